use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::MispApiError;
use super::models::{
    Attribute, AttributeResponse, AttributeSearchEnvelope, AttributeSearchResponse, Event,
    EventList, EventRecord, EventResponse, ObjectTemplateEntry, ObjectTemplateList, RawResponse,
};

/// Body fragment MISP returns when an attribute with the same value is already
/// attached to the event.
pub const DUPLICATE_ATTRIBUTE_MARKER: &str = "A similar attribute already exists for this event.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct MispClient {
    base_url: String,
    verify_ssl: bool,
    http: Client,
}

impl MispClient {
    pub fn new(base_url: String, api_key: String, verify_ssl: bool) -> Result<Self, MispApiError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        debug!(%base_url, %verify_ssl, "Creating new MispClient with API key");

        let mut auth_value = HeaderValue::from_str(&api_key).map_err(|_| {
            MispApiError::ConfigurationError(
                "API key contains characters not allowed in an HTTP header".to_string(),
            )
        })?;
        auth_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("mcp-server-misp/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(!verify_ssl)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(MispApiError::HttpClientCreationError)?;

        debug!("MISP client configuration created successfully");

        Ok(Self {
            base_url,
            verify_ssl,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn verify_ssl(&self) -> bool {
        self.verify_ssl
    }

    /// `GET /events/{event_id}`
    pub async fn get_event(&self, event_id: &str) -> Result<EventResponse, MispApiError> {
        debug!(event_id, "Retrieving event by ID from MISP");
        info!("Fetching event with ID: {}", event_id);

        let (status, raw) = self
            .send(Method::GET, &format!("/events/{}", event_id), None)
            .await?;

        if status == StatusCode::NOT_FOUND {
            error!("Event {} not found in MISP", event_id);
            return Err(MispApiError::EventNotFound(event_id.to_string()));
        }
        check_status(status, &raw)?;

        let mut parsed: EventResponse = decode(&raw)?;
        parsed.raw = raw;
        debug!("Successfully retrieved event {} from MISP", event_id);
        Ok(parsed)
    }

    /// `POST /events/index/searchtag:{tag}`
    pub async fn search_event_tag(&self, tag: &str) -> Result<EventList, MispApiError> {
        debug!(tag, "Searching MISP events by tag");
        info!("Searching events tagged with: {}", tag);

        let (status, raw) = self
            .send(
                Method::POST,
                &format!("/events/index/searchtag:{}", tag),
                None,
            )
            .await?;
        check_status(status, &raw)?;

        let events: Vec<EventRecord> = decode(&raw)?;
        debug!("Found {} events tagged with {}", events.len(), tag);
        Ok(EventList { events, raw })
    }

    /// `POST /attributes/restSearch` with a caller-built search document.
    pub async fn search_attributes_raw(
        &self,
        search: Vec<u8>,
    ) -> Result<AttributeSearchResponse, MispApiError> {
        debug!(query_bytes = search.len(), "Running MISP attribute restSearch");

        let (status, raw) = self
            .send(Method::POST, "/attributes/restSearch", Some(search))
            .await?;
        check_status(status, &raw)?;

        let envelope: AttributeSearchEnvelope = decode(&raw)?;
        let attributes = envelope.into_attributes();
        info!("Attribute search returned {} attributes", attributes.len());
        Ok(AttributeSearchResponse { attributes, raw })
    }

    /// `POST /events`, sending the event wrapped as `{"Event": ...}`.
    pub async fn create_event(&self, event: &Event) -> Result<EventResponse, MispApiError> {
        debug!(info = %event.info, "Creating event in MISP");
        info!("Creating event titled: {}", event.info);

        let body = serde_json::to_vec(&json!({ "Event": event }))?;

        let (status, raw) = match self.send(Method::POST, "/events", Some(body)).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to create event in MISP: {}", e);
                return Err(e);
            }
        };
        check_status(status, &raw)?;

        let mut parsed: EventResponse = decode(&raw)?;
        parsed.raw = raw;
        debug!("Successfully created event with ID: {}", parsed.event.id);
        Ok(parsed)
    }

    /// `POST /events/addTag/{event_id}` once per tag, stopping at the first
    /// failure.
    pub async fn add_tags_to_event(
        &self,
        event_id: &str,
        tags: &[String],
    ) -> Result<(), MispApiError> {
        info!("Adding {} tags to event {}", tags.len(), event_id);
        let path = format!("/events/addTag/{}", event_id);

        for tag in tags {
            debug!(event_id, tag = %tag, "Adding tag to event");
            let body = serde_json::to_vec(&json!({ "tag": tag }))?;
            let (status, raw) = self.send(Method::POST, &path, Some(body)).await?;

            if let Err(e) = check_status(status, &raw) {
                error!("Failed to add tag {} to event {}: {}", tag, event_id, e);
                return Err(e);
            }
        }

        Ok(())
    }

    /// `POST /objects/add/{event_id}/{template_id}` with a caller-built object
    /// document. The reply is returned undecoded.
    pub async fn add_object(
        &self,
        event_id: &str,
        template_id: &str,
        body: Vec<u8>,
    ) -> Result<RawResponse, MispApiError> {
        debug!(event_id, template_id, "Adding object to MISP event");
        info!("Adding object from template {} to event {}", template_id, event_id);

        let (status, raw) = self
            .send(
                Method::POST,
                &format!("/objects/add/{}/{}", event_id, template_id),
                Some(body),
            )
            .await?;
        check_status(status, &raw)?;

        Ok(RawResponse {
            status: status.as_u16(),
            raw,
        })
    }

    /// `GET /objectTemplates`
    pub async fn get_object_templates_list(&self) -> Result<ObjectTemplateList, MispApiError> {
        debug!("Retrieving object templates from MISP");

        let (status, raw) = self.send(Method::GET, "/objectTemplates", None).await?;
        check_status(status, &raw)?;

        let templates: Vec<ObjectTemplateEntry> = decode(&raw)?;
        info!("Retrieved {} object templates from MISP", templates.len());
        Ok(ObjectTemplateList { templates, raw })
    }

    /// `POST /sightings/add/{attribute_id}`
    pub async fn add_sighting(&self, attribute_id: &str) -> Result<(), MispApiError> {
        debug!(attribute_id, "Adding sighting in MISP");
        info!("Recording sighting for attribute {}", attribute_id);

        let (status, raw) = self
            .send(
                Method::POST,
                &format!("/sightings/add/{}", attribute_id),
                None,
            )
            .await?;

        check_status(status, &raw).inspect_err(|e| {
            error!("Failed to add sighting for attribute {}: {}", attribute_id, e);
        })
    }

    /// `POST /attributes/add/{event_id}` with a JSON array of attributes.
    ///
    /// MISP answers duplicates with a 403 whose body names the clash, so the
    /// body is inspected before the status.
    pub async fn add_attributes_to_event(
        &self,
        event_id: &str,
        attributes: &[Attribute],
    ) -> Result<AttributeResponse, MispApiError> {
        debug!(event_id, count = attributes.len(), "Adding attributes to MISP event");
        info!("Adding {} attributes to event {}", attributes.len(), event_id);

        let body = serde_json::to_vec(attributes)?;
        let (status, raw) = self
            .send(
                Method::POST,
                &format!("/attributes/add/{}", event_id),
                Some(body),
            )
            .await?;

        if String::from_utf8_lossy(&raw).contains(DUPLICATE_ATTRIBUTE_MARKER) {
            warn!("MISP reported a duplicate attribute on event {}", event_id);
            let mut parsed: AttributeResponse = serde_json::from_slice(&raw).unwrap_or_default();
            parsed.raw = raw;
            return Err(MispApiError::AttributeAlreadyExists(Box::new(parsed)));
        }
        check_status(status, &raw)?;

        let mut parsed: AttributeResponse = decode(&raw)?;
        parsed.raw = raw;
        debug!(
            "Successfully added {} attributes to event {}",
            parsed.attributes.len(),
            event_id
        );
        Ok(parsed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Vec<u8>), MispApiError> {
        let url = self.url(path);
        debug!(%method, %url, "Sending request to MISP");

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            error!("Request to {} failed: {}", url, e);
            MispApiError::from(e)
        })?;
        let status = response.status();
        let raw = response.bytes().await?.to_vec();

        debug!(status = status.as_u16(), bytes = raw.len(), "Received MISP response");
        Ok((status, raw))
    }
}

fn check_status(status: StatusCode, raw: &[u8]) -> Result<(), MispApiError> {
    if status.is_success() {
        return Ok(());
    }

    let body = String::from_utf8_lossy(raw).into_owned();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(MispApiError::AuthenticationError(body))
        }
        _ => Err(MispApiError::ApiError {
            status: status.as_u16(),
            body,
        }),
    }
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, MispApiError> {
    serde_json::from_slice(raw).map_err(|e| {
        error!(
            "Error deserializing MISP response: {}. Raw JSON: {}",
            e,
            String::from_utf8_lossy(raw)
        );
        MispApiError::from(e)
    })
}
