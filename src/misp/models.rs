//! Typed mirrors of the JSON documents exchanged with the MISP REST API.
//!
//! MISP serializes identifiers, counters and timestamps as strings, so they
//! stay `String` here. Request-side types omit every empty field so a POST only
//! carries what the caller set. Response-side types default every field, since
//! the server leaves keys out or sends `null` depending on version and context.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Treats an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Org {
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub uuid: String,
}

/// Creator organisation of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Orgc {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub attribute_type: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_false")]
    pub to_ids: bool,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub event_id: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub distribution: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub sharing_group_id: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_false")]
    pub disable_correlation: bool,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub object_id: String,
    /// Free-form: MISP sends a string, `null`, or omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_relation: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(
        rename = "Sighting",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sightings: Vec<Sighting>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub colour: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub exportable: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hide_tag: bool,
    #[serde(default)]
    pub numerical_value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attribute_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub event_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub org_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub date_sighting: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub sighting_type: String,
    #[serde(rename = "Organisation", default, deserialize_with = "null_as_default")]
    pub organisation: Org,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attribute_uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTag {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub event_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tag_id: String,
    #[serde(rename = "Tag", default, deserialize_with = "null_as_default")]
    pub tag: Tag,
}

/// Event as sent to `POST /events`. Wrapped in `{"Event": ...}` on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub orgc_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub threat_level_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub published: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub attribute_count: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub analysis: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub distribution: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub proposal_email_lock: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub publish_timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sharing_group_id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_correlation: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event_creator_email: String,
}

/// Event as returned by the server, with its attributes, orgs and tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub org_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub info: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub published: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub analysis: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attribute_count: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub orgc_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub distribution: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sharing_group_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub proposal_email_lock: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub locked: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub threat_level_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub publish_timestamp: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub disable_correlation: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub extends_uuid: String,
    #[serde(rename = "Attribute", default, deserialize_with = "null_as_default")]
    pub attributes: Vec<Attribute>,
    #[serde(rename = "Org", default, deserialize_with = "null_as_default")]
    pub org: Org,
    #[serde(rename = "Orgc", default, deserialize_with = "null_as_default")]
    pub orgc: Orgc,
    #[serde(rename = "EventTag", default, deserialize_with = "null_as_default")]
    pub event_tags: Vec<EventTag>,
}

impl EventRecord {
    /// Names of the tags attached through `EventTag`.
    pub fn tag_names(&self) -> Vec<&str> {
        self.event_tags
            .iter()
            .map(|event_tag| event_tag.tag.name.as_str())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectTemplateRequirements {
    #[serde(default, deserialize_with = "null_as_default")]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectTemplate {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub org_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "meta-category", default, deserialize_with = "null_as_default")]
    pub meta_category: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub requirements: ObjectTemplateRequirements,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fixed: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub active: bool,
}

/// One element of the `GET /objectTemplates` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectTemplateEntry {
    #[serde(rename = "ObjectTemplate", default, deserialize_with = "null_as_default")]
    pub object_template: ObjectTemplate,
    #[serde(rename = "Organisation", default, deserialize_with = "null_as_default")]
    pub organisation: Org,
}

/// `{"Event": {...}}` as returned by `GET /events/{id}` and `POST /events`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventResponse {
    #[serde(rename = "Event", default, deserialize_with = "null_as_default")]
    pub event: EventRecord,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct EventList {
    pub events: Vec<EventRecord>,
    pub raw: Vec<u8>,
}

/// Reply to `POST /attributes/add/{event_id}`.
///
/// `Attribute` holds a single object when one attribute was saved and an
/// array when several were; both land in `attributes`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttributeResponse {
    #[serde(rename = "Attribute", default, deserialize_with = "one_or_many")]
    pub attributes: Vec<Attribute>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Map<String, Value>,
    #[serde(skip)]
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct AttributeSearchResponse {
    pub attributes: Vec<Attribute>,
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectTemplateList {
    pub templates: Vec<ObjectTemplateEntry>,
    pub raw: Vec<u8>,
}

/// Reply whose body is not modelled; only the status and bytes are kept.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub raw: Vec<u8>,
}

impl RawResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}

/// `{"response": {"Attribute": [...]}}` from `/attributes/restSearch`.
#[derive(Deserialize)]
pub(crate) struct AttributeSearchEnvelope {
    #[serde(default)]
    response: Option<AttributeSearchBody>,
}

impl AttributeSearchEnvelope {
    pub(crate) fn into_attributes(self) -> Vec<Attribute> {
        match self.response {
            Some(AttributeSearchBody::Found { attributes }) => attributes,
            Some(AttributeSearchBody::Empty(_)) | None => Vec::new(),
        }
    }
}

/// Some MISP versions answer a search without hits with `"response": []`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AttributeSearchBody {
    Empty(Vec<Value>),
    Found {
        #[serde(rename = "Attribute", default, deserialize_with = "null_as_default")]
        attributes: Vec<Attribute>,
    },
}
