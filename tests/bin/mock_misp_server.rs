use axum::{
    extract::{Path, Request},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const MOCK_API_KEY: &str = "test_api_key";
const DUPLICATE_MESSAGE: &str = "A similar attribute already exists for this event.";

fn now_secs() -> String {
    Utc::now().timestamp().to_string()
}

#[derive(Debug, Clone, Serialize)]
struct MockTag {
    id: String,
    name: String,
    colour: String,
    exportable: bool,
    user_id: String,
    hide_tag: bool,
    numerical_value: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
struct MockEventTag {
    id: String,
    event_id: String,
    tag_id: String,
    #[serde(rename = "Tag")]
    tag: MockTag,
}

#[derive(Debug, Clone, Serialize)]
struct MockSighting {
    id: String,
    attribute_id: String,
    event_id: String,
    org_id: String,
    date_sighting: String,
    uuid: String,
    source: String,
    #[serde(rename = "type")]
    sighting_type: String,
}

#[derive(Debug, Clone, Serialize)]
struct MockAttribute {
    id: String,
    event_id: String,
    #[serde(rename = "type")]
    attribute_type: String,
    category: String,
    value: String,
    to_ids: bool,
    uuid: String,
    distribution: String,
    timestamp: String,
    comment: String,
    deleted: bool,
    object_id: String,
    object_relation: Option<String>,
    #[serde(rename = "Sighting")]
    sightings: Vec<MockSighting>,
}

#[derive(Debug, Clone, Serialize)]
struct MockOrg {
    id: String,
    name: String,
    uuid: String,
}

#[derive(Debug, Clone, Serialize)]
struct MockEvent {
    id: String,
    org_id: String,
    orgc_id: String,
    date: String,
    info: String,
    uuid: String,
    published: bool,
    analysis: String,
    attribute_count: String,
    timestamp: String,
    distribution: String,
    sharing_group_id: String,
    proposal_email_lock: bool,
    locked: bool,
    threat_level_id: String,
    publish_timestamp: String,
    disable_correlation: bool,
    extends_uuid: String,
    #[serde(rename = "Org")]
    org: MockOrg,
    #[serde(rename = "Orgc")]
    orgc: MockOrg,
    #[serde(rename = "Attribute")]
    attributes: Vec<MockAttribute>,
    #[serde(rename = "EventTag")]
    event_tags: Vec<MockEventTag>,
}

// --- Mock Input Structs for Deserialization ---
#[derive(Deserialize, Debug)]
struct MockInputEventEnvelope {
    #[serde(rename = "Event")]
    event: MockInputEvent,
}

#[derive(Deserialize, Debug)]
struct MockInputEvent {
    info: String,
    distribution: Option<String>,
    threat_level_id: Option<String>,
    analysis: Option<String>,
    date: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MockInputTag {
    tag: String,
}

#[derive(Deserialize, Debug)]
struct MockInputAttribute {
    #[serde(rename = "type")]
    attribute_type: String,
    category: Option<String>,
    value: String,
    #[serde(default)]
    to_ids: bool,
    comment: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MockSearchQuery {
    value: Option<String>,
    #[serde(rename = "type")]
    attribute_type: Option<String>,
}

struct MockData {
    events: BTreeMap<String, MockEvent>,
    tags: BTreeMap<String, MockTag>,
    next_event_id: u32,
    next_attribute_id: u32,
    next_tag_id: u32,
    next_sighting_id: u32,
}

fn circl() -> MockOrg {
    MockOrg {
        id: "1".to_string(),
        name: "CIRCL".to_string(),
        uuid: "55f6ea5e-2c60-40e5-964f-47a8950d210f".to_string(),
    }
}

fn mock_tag(id: &str, name: &str, colour: &str) -> MockTag {
    MockTag {
        id: id.to_string(),
        name: name.to_string(),
        colour: colour.to_string(),
        exportable: true,
        user_id: "0".to_string(),
        hide_tag: false,
        numerical_value: None,
    }
}

fn mock_attribute(id: &str, event_id: &str, attribute_type: &str, category: &str, value: &str) -> MockAttribute {
    MockAttribute {
        id: id.to_string(),
        event_id: event_id.to_string(),
        attribute_type: attribute_type.to_string(),
        category: category.to_string(),
        value: value.to_string(),
        to_ids: true,
        uuid: format!("5c1a0b7e-0000-4000-8000-{:012}", id.parse::<u64>().unwrap_or(0)),
        distribution: "5".to_string(),
        timestamp: "1700000000".to_string(),
        comment: String::new(),
        deleted: false,
        object_id: "0".to_string(),
        object_relation: None,
        sightings: Vec::new(),
    }
}

fn tag_event(event: &mut MockEvent, tag: &MockTag, link_id: u32) {
    if event.event_tags.iter().any(|et| et.tag.name == tag.name) {
        return;
    }
    event.event_tags.push(MockEventTag {
        id: link_id.to_string(),
        event_id: event.id.clone(),
        tag_id: tag.id.clone(),
        tag: tag.clone(),
    });
}

static MOCK_DATA: Lazy<Mutex<MockData>> = Lazy::new(|| {
    let mut tags = BTreeMap::new();
    tags.insert("tlp:amber".to_string(), mock_tag("1", "tlp:amber", "#FFC000"));
    tags.insert("tlp:green".to_string(), mock_tag("2", "tlp:green", "#33FF00"));
    tags.insert("malware:emotet".to_string(), mock_tag("3", "malware:emotet", "#8B0000"));

    let mut emotet = MockEvent {
        id: "1".to_string(),
        org_id: "1".to_string(),
        orgc_id: "1".to_string(),
        date: "2023-11-14".to_string(),
        info: "Emotet C2 infrastructure".to_string(),
        uuid: "b3a1d6c2-7f4e-4b8a-9c3d-1e2f3a4b5c6d".to_string(),
        published: true,
        analysis: "2".to_string(),
        attribute_count: "2".to_string(),
        timestamp: "1700000000".to_string(),
        distribution: "1".to_string(),
        sharing_group_id: "0".to_string(),
        proposal_email_lock: false,
        locked: false,
        threat_level_id: "1".to_string(),
        publish_timestamp: "1700000100".to_string(),
        disable_correlation: false,
        extends_uuid: String::new(),
        org: circl(),
        orgc: circl(),
        attributes: vec![
            mock_attribute("11", "1", "ip-dst", "Network activity", "203.0.113.10"),
            mock_attribute("12", "1", "domain", "Network activity", "c2.emotet.example"),
        ],
        event_tags: Vec::new(),
    };
    tag_event(&mut emotet, &tags["tlp:amber"], 1);
    tag_event(&mut emotet, &tags["malware:emotet"], 2);

    let mut phishing = MockEvent {
        id: "2".to_string(),
        info: "Credential phishing wave".to_string(),
        uuid: "0d9c8b7a-6f5e-4d3c-2b1a-0f9e8d7c6b5a".to_string(),
        published: false,
        analysis: "1".to_string(),
        attribute_count: "1".to_string(),
        threat_level_id: "2".to_string(),
        date: "2023-12-01".to_string(),
        attributes: vec![mock_attribute(
            "21",
            "2",
            "url",
            "Payload delivery",
            "https://login.phish.example/",
        )],
        event_tags: Vec::new(),
        ..emotet.clone()
    };
    tag_event(&mut phishing, &tags["tlp:green"], 3);

    let mut events = BTreeMap::new();
    events.insert(emotet.id.clone(), emotet);
    events.insert(phishing.id.clone(), phishing);

    Mutex::new(MockData {
        events,
        tags,
        next_event_id: 3,
        next_attribute_id: 100,
        next_tag_id: 4,
        next_sighting_id: 1,
    })
});

fn misp_error(status: StatusCode, message: &str, url: &str) -> Response {
    (
        status,
        Json(json!({"name": message, "message": message, "url": url})),
    )
        .into_response()
}

async fn require_api_key(request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(MOCK_API_KEY);

    if !authorized {
        warn!("Rejecting request to {} without a valid API key", request.uri());
        return misp_error(
            StatusCode::FORBIDDEN,
            "Authentication failed. Please make sure you pass the API key of an API enabled user along in the Authorization header.",
            request.uri().path(),
        );
    }
    next.run(request).await
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

async fn get_event(Path(id): Path<String>) -> Response {
    info!("GET /events/{}", id);

    if id == "500" {
        warn!("Simulating server failure for event 500");
        return misp_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error", "/events/500");
    }

    let data = MOCK_DATA.lock().unwrap();
    match data.events.get(&id) {
        Some(event) => (StatusCode::OK, Json(json!({ "Event": event }))).into_response(),
        None => {
            warn!("Event not found: {}", id);
            misp_error(StatusCode::NOT_FOUND, "Invalid event.", &format!("/events/{}", id))
        }
    }
}

async fn search_events_index(Path(selector): Path<String>) -> Response {
    info!("POST /events/index/{}", selector);

    let Some(tag) = selector.strip_prefix("searchtag:") else {
        return misp_error(StatusCode::BAD_REQUEST, "Unsupported index filter.", "/events/index");
    };

    let data = MOCK_DATA.lock().unwrap();
    let events: Vec<Value> = data
        .events
        .values()
        .filter(|event| {
            event
                .event_tags
                .iter()
                .any(|et| et.tag.name == tag || et.tag.id == tag)
        })
        .map(|event| {
            // Index listings carry no attributes.
            let mut listed = event.clone();
            listed.attributes.clear();
            json!(listed)
        })
        .collect();

    (StatusCode::OK, Json(events)).into_response()
}

async fn create_event(Json(payload): Json<MockInputEventEnvelope>) -> Response {
    info!("POST /events with payload: {:?}", payload);
    let mut data = MOCK_DATA.lock().unwrap();

    let id = data.next_event_id;
    data.next_event_id += 1;
    let input = payload.event;
    let today = Utc::now().format("%Y-%m-%d").to_string();

    let event = MockEvent {
        id: id.to_string(),
        org_id: "1".to_string(),
        orgc_id: "1".to_string(),
        date: input.date.unwrap_or(today),
        info: input.info,
        uuid: format!("a0a0a0a0-0000-4000-8000-{:012}", id),
        published: false,
        analysis: input.analysis.unwrap_or_else(|| "0".to_string()),
        attribute_count: "0".to_string(),
        timestamp: now_secs(),
        distribution: input.distribution.unwrap_or_else(|| "1".to_string()),
        sharing_group_id: "0".to_string(),
        proposal_email_lock: false,
        locked: false,
        threat_level_id: input.threat_level_id.unwrap_or_else(|| "4".to_string()),
        publish_timestamp: "0".to_string(),
        disable_correlation: false,
        extends_uuid: String::new(),
        org: circl(),
        orgc: circl(),
        attributes: Vec::new(),
        event_tags: Vec::new(),
    };

    data.events.insert(event.id.clone(), event.clone());
    info!("Created new event {}", event.id);
    (StatusCode::OK, Json(json!({ "Event": event }))).into_response()
}

async fn add_tag(Path(event_id): Path<String>, Json(payload): Json<MockInputTag>) -> Response {
    info!("POST /events/addTag/{} with tag {}", event_id, payload.tag);
    let url = format!("/events/addTag/{}", event_id);
    let mut data = MOCK_DATA.lock().unwrap();

    if !data.events.contains_key(&event_id) {
        return misp_error(StatusCode::NOT_FOUND, "Invalid event.", &url);
    }

    let tag = match data.tags.get(&payload.tag) {
        Some(tag) => tag.clone(),
        None => {
            let id = data.next_tag_id;
            data.next_tag_id += 1;
            let tag = mock_tag(&id.to_string(), &payload.tag, "#0088cc");
            data.tags.insert(payload.tag.clone(), tag.clone());
            tag
        }
    };
    let link_id = data.next_tag_id + 1000;

    if let Some(event) = data.events.get_mut(&event_id) {
        tag_event(event, &tag, link_id);
    }

    (
        StatusCode::OK,
        Json(json!({"saved": true, "success": "Tag added.", "check_publish": true})),
    )
        .into_response()
}

async fn add_attributes(
    Path(event_id): Path<String>,
    Json(payload): Json<Vec<MockInputAttribute>>,
) -> Response {
    info!("POST /attributes/add/{} with {} attributes", event_id, payload.len());
    let url = format!("/attributes/add/{}", event_id);
    let mut data = MOCK_DATA.lock().unwrap();

    let Some(existing) = data.events.get(&event_id).map(|event| event.attributes.clone()) else {
        return misp_error(StatusCode::NOT_FOUND, "Invalid event.", &url);
    };

    if payload
        .iter()
        .any(|input| existing.iter().any(|attr| attr.value == input.value))
    {
        warn!("Duplicate attribute submitted to event {}", event_id);
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "name": "Could not add Attribute",
                "message": "Could not add Attribute",
                "url": url,
                "errors": {"value": [DUPLICATE_MESSAGE]}
            })),
        )
            .into_response();
    }

    let mut saved = Vec::new();
    for input in payload {
        let id = data.next_attribute_id;
        data.next_attribute_id += 1;
        let mut attribute = mock_attribute(
            &id.to_string(),
            &event_id,
            &input.attribute_type,
            input.category.as_deref().unwrap_or("Other"),
            &input.value,
        );
        attribute.to_ids = input.to_ids;
        attribute.comment = input.comment.unwrap_or_default();
        attribute.timestamp = now_secs();
        saved.push(attribute);
    }

    if let Some(event) = data.events.get_mut(&event_id) {
        event.attributes.extend(saved.iter().cloned());
        event.attribute_count = event.attributes.len().to_string();
    }

    let body = if saved.len() == 1 {
        json!({ "Attribute": saved[0] })
    } else {
        json!({ "Attribute": saved })
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn rest_search(Json(query): Json<MockSearchQuery>) -> Response {
    info!("POST /attributes/restSearch with query: {:?}", query);
    let data = MOCK_DATA.lock().unwrap();

    let matches: Vec<MockAttribute> = data
        .events
        .values()
        .flat_map(|event| event.attributes.iter())
        .filter(|attr| query.value.as_deref().map_or(true, |v| attr.value == v))
        .filter(|attr| {
            query
                .attribute_type
                .as_deref()
                .map_or(true, |t| attr.attribute_type == t)
        })
        .cloned()
        .collect();

    (StatusCode::OK, Json(json!({"response": {"Attribute": matches}}))).into_response()
}

async fn add_sighting(Path(attribute_id): Path<String>) -> Response {
    info!("POST /sightings/add/{}", attribute_id);
    let mut data = MOCK_DATA.lock().unwrap();
    let sighting_id = data.next_sighting_id;
    data.next_sighting_id += 1;

    let attribute = data
        .events
        .values_mut()
        .flat_map(|event| event.attributes.iter_mut())
        .find(|attr| attr.id == attribute_id || attr.uuid == attribute_id);

    match attribute {
        Some(attr) => {
            attr.sightings.push(MockSighting {
                id: sighting_id.to_string(),
                attribute_id: attr.id.clone(),
                event_id: attr.event_id.clone(),
                org_id: "1".to_string(),
                date_sighting: now_secs(),
                uuid: format!("5e5e5e5e-0000-4000-8000-{:012}", sighting_id),
                source: String::new(),
                sighting_type: "0".to_string(),
            });
            (
                StatusCode::OK,
                Json(json!({"saved": true, "success": "1 sighting successfully added.", "id": attribute_id})),
            )
                .into_response()
        }
        None => misp_error(
            StatusCode::NOT_FOUND,
            "Invalid attribute.",
            &format!("/sightings/add/{}", attribute_id),
        ),
    }
}

async fn list_object_templates() -> Response {
    info!("GET /objectTemplates");
    let organisation = json!({"id": "1", "name": "MISP", "uuid": "0000000-0000-0000-0000-000000000000"});
    (
        StatusCode::OK,
        Json(json!([
            {
                "ObjectTemplate": {
                    "id": "1",
                    "user_id": "1",
                    "org_id": "1",
                    "uuid": "688c46fb-5edb-40a3-8273-1af7923e2215",
                    "name": "domain-ip",
                    "meta-category": "network",
                    "description": "A domain and IP address seen as a tuple in a specific time frame.",
                    "version": "9",
                    "requirements": {"required": []},
                    "fixed": true,
                    "active": true
                },
                "Organisation": organisation
            },
            {
                "ObjectTemplate": {
                    "id": "2",
                    "user_id": "1",
                    "org_id": "1",
                    "uuid": "688c46fb-5edb-40a3-8273-1af7923e2216",
                    "name": "file",
                    "meta-category": "file",
                    "description": "File object describing a file with meta-information",
                    "version": "24",
                    "requirements": {"required": ["filename"]},
                    "fixed": true,
                    "active": true
                },
                "Organisation": organisation
            }
        ])),
    )
        .into_response()
}

async fn add_object(
    Path((event_id, template_id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Response {
    info!("POST /objects/add/{}/{} with payload: {}", event_id, template_id, payload);

    if !MOCK_DATA.lock().unwrap().events.contains_key(&event_id) {
        return misp_error(
            StatusCode::NOT_FOUND,
            "Invalid event.",
            &format!("/objects/add/{}/{}", event_id, template_id),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "Object": {
                "id": "1",
                "event_id": event_id,
                "template_uuid": "688c46fb-5edb-40a3-8273-1af7923e2215",
                "name": payload["Object"]["name"].as_str().unwrap_or("domain-ip")
            }
        })),
    )
        .into_response()
}

async fn catch_all(
    method: axum::http::Method,
    uri: axum::http::Uri,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    warn!("Unhandled request: {} {}", method, path);

    let body_str = String::from_utf8_lossy(&body);
    if !body_str.is_empty() {
        warn!("Request body: {}", body_str);
    }

    misp_error(
        StatusCode::NOT_FOUND,
        &format!("No handler for: {} {}", method, path),
        &path,
    )
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr) // stdout carries the port line
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Starting Mock MISP Server...");

    let app = Router::new()
        .route("/events/:id", get(get_event))
        .route("/events/index/:selector", post(search_events_index))
        .route("/events", post(create_event))
        .route("/events/addTag/:id", post(add_tag))
        .route("/attributes/add/:event_id", post(add_attributes))
        .route("/attributes/restSearch", post(rest_search))
        .route("/sightings/add/:attribute_id", post(add_sighting))
        .route("/objectTemplates", get(list_object_templates))
        .route("/objects/add/:event_id/:template_id", post(add_object))
        .route_layer(middleware::from_fn(require_api_key))
        .route("/health", get(health_check))
        .fallback(catch_all);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    println!("MOCK_SERVER_PORT={}", port);
    info!("Mock server listening on 127.0.0.1:{}", port);

    axum::serve(listener, app).await.unwrap();
}
