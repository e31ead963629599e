//
// Purpose:
//
// This Rust application implements an MCP (Model Context Protocol) server that acts as a
// bridge to a MISP threat-intelligence instance. It exposes the MISP client operations as
// tools that can be invoked by MCP clients (e.g., AI models, automation scripts).
//
// Structure:
// - `main()`: Entry point. Initializes logging (tracing), sets up `MispToolsServer`,
//   and starts the MCP server using stdio transport.
//
// - `MispToolsServer`: Implements `rmcp::ServerHandler` through `#[tool(tool_box)]`.
//   It holds the `MispClient`; each `#[tool(...)]` method maps onto one client call.
//
// - Tool parameter structs (e.g., `GetEventParams`, `AddAttributesParams`) are parsed
//   with `serde::Deserialize` and described to clients with `schemars::JsonSchema`.
//
// Configuration:
// `MISP_URL` and `MISP_API_KEY` select the MISP instance, `VERIFY_SSL=true` turns on
// certificate verification. A `.env` file is honoured. Logging is controlled by `RUST_LOG`
// and always goes to stderr because stdout carries the MCP transport.

use clap::Parser;
use dotenv::dotenv;
use mcp_server_misp::models::{Attribute, Event, EventRecord, ObjectTemplateEntry};
use mcp_server_misp::{MispApiError, MispClient};
use rmcp::{
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars, tool,
    transport::stdio,
    Error as McpError, ServerHandler, ServiceExt,
};
use std::env;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mcp-server-misp", version)]
#[command(about = "MISP Threat Intelligence Platform MCP Server")]
struct Args {
    // Only stdio transport is supported
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct GetEventParams {
    #[schemars(description = "The ID or UUID of the event to retrieve")]
    event_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct SearchEventsByTagParams {
    #[schemars(description = "Tag name or tag ID to search for (e.g. \"tlp:amber\")")]
    tag: String,
    #[schemars(description = "Maximum number of events to return (default: 100)")]
    limit: Option<u32>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateEventParams {
    #[schemars(description = "Event title (the MISP 'info' field).")]
    info: String,
    #[schemars(
        description = "Distribution (0 Your organisation only, 1 This community only, 2 Connected communities, 3 All communities, 4 Sharing group, 5 Inherit event)."
    )]
    distribution: Option<u8>,
    #[schemars(description = "Threat level (1 High, 2 Medium, 3 Low, 4 Undefined).")]
    threat_level_id: Option<u8>,
    #[schemars(description = "Analysis state (0 Initial, 1 Ongoing, 2 Completed).")]
    analysis: Option<u8>,
    #[schemars(description = "Event date as YYYY-MM-DD. Defaults to today on the server.")]
    date: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct AddEventTagsParams {
    #[schemars(description = "The ID of the event to tag")]
    event_id: String,
    #[schemars(description = "Tag names to attach, applied in order")]
    tags: Vec<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct AttributeParams {
    #[serde(rename = "type")]
    #[schemars(description = "MISP attribute type (e.g. \"ip-dst\", \"domain\", \"md5\")")]
    attribute_type: String,
    #[schemars(description = "MISP category (e.g. \"Network activity\"). Server picks the type default if omitted.")]
    category: Option<String>,
    #[schemars(description = "The attribute value")]
    value: String,
    #[schemars(description = "Whether the attribute is an IDS signature")]
    to_ids: Option<bool>,
    #[schemars(description = "Free-text comment")]
    comment: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct AddAttributesParams {
    #[schemars(description = "The ID of the event receiving the attributes")]
    event_id: String,
    #[schemars(description = "Attributes to add")]
    attributes: Vec<AttributeParams>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct AddSightingParams {
    #[schemars(description = "The ID or UUID of the attribute that was sighted")]
    attribute_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct GetObjectTemplatesParams {
    #[schemars(description = "Maximum number of templates to return (default: 100)")]
    limit: Option<u32>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct AddObjectParams {
    #[schemars(description = "The ID of the event receiving the object")]
    event_id: String,
    #[schemars(description = "The ID of the object template the object follows")]
    template_id: String,
    #[schemars(description = "Object document as expected by MISP /objects/add")]
    object: serde_json::Value,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct SearchAttributesParams {
    #[schemars(description = "restSearch query document (e.g. {\"value\": \"8.8.8.8\"})")]
    query: serde_json::Value,
    #[schemars(description = "Maximum number of attributes to return (default: 100)")]
    limit: Option<u32>,
}

fn format_timestamp(timestamp: &str) -> String {
    timestamp
        .parse::<i64>()
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn threat_level_label(threat_level_id: &str) -> &'static str {
    match threat_level_id {
        "1" => "High",
        "2" => "Medium",
        "3" => "Low",
        "4" => "Undefined",
        _ => "Unknown",
    }
}

fn analysis_label(analysis: &str) -> &'static str {
    match analysis {
        "0" => "Initial",
        "1" => "Ongoing",
        "2" => "Completed",
        _ => "Unknown",
    }
}

fn distribution_label(distribution: &str) -> &'static str {
    match distribution {
        "0" => "Your organisation only",
        "1" => "This community only",
        "2" => "Connected communities",
        "3" => "All communities",
        "4" => "Sharing group",
        "5" => "Inherit event",
        _ => "Unknown",
    }
}

fn format_event(event: &EventRecord) -> String {
    let tags = event.tag_names();
    let tags = if tags.is_empty() {
        "None".to_string()
    } else {
        tags.join(", ")
    };
    let creator = if event.orgc.name.is_empty() {
        "Unknown"
    } else {
        event.orgc.name.as_str()
    };

    format!(
        "Event ID: {}\nUUID: {}\nInfo: {}\nDate: {}\nThreat Level: {} ({})\nAnalysis: {}\nDistribution: {}\nPublished: {}\nCreator Org: {}\nAttribute Count: {}\nTags: {}\nLast Modified: {}",
        event.id,
        event.uuid,
        event.info,
        event.date,
        event.threat_level_id,
        threat_level_label(&event.threat_level_id),
        analysis_label(&event.analysis),
        distribution_label(&event.distribution),
        event.published,
        creator,
        event.attribute_count,
        tags,
        format_timestamp(&event.timestamp)
    )
}

fn format_attribute(attribute: &Attribute) -> String {
    let mut text = format!(
        "Attribute ID: {}\nEvent ID: {}\nType: {}\nCategory: {}\nValue: {}\nIDS: {}\nLast Modified: {}",
        attribute.id,
        attribute.event_id,
        attribute.attribute_type,
        attribute.category,
        attribute.value,
        attribute.to_ids,
        format_timestamp(&attribute.timestamp)
    );
    if !attribute.comment.is_empty() {
        text.push_str(&format!("\nComment: {}", attribute.comment));
    }
    if !attribute.sightings.is_empty() {
        text.push_str(&format!("\nSightings: {}", attribute.sightings.len()));
    }
    text
}

fn format_object_template(entry: &ObjectTemplateEntry) -> String {
    let template = &entry.object_template;
    let required = if template.requirements.required.is_empty() {
        "None".to_string()
    } else {
        template.requirements.required.join(", ")
    };

    format!(
        "Template ID: {}\nName: {}\nMeta-category: {}\nVersion: {}\nDescription: {}\nRequired: {}\nActive: {}\nOrganisation: {}",
        template.id,
        template.name,
        template.meta_category,
        template.version,
        template.description,
        required,
        template.active,
        entry.organisation.name
    )
}

/// Accepts a code only when it is inside the range MISP knows.
fn checked_code(field: &str, value: Option<u8>, max: u8) -> String {
    match value {
        Some(v) if v <= max => v.to_string(),
        Some(v) => {
            tracing::warn!("Invalid {} value {}, leaving it to the server default", field, v);
            String::new()
        }
        None => String::new(),
    }
}

#[derive(Clone)]
struct MispToolsServer {
    misp_client: Arc<MispClient>,
}

#[tool(tool_box)]
impl MispToolsServer {
    fn new() -> Result<Self, anyhow::Error> {
        dotenv().ok();

        let misp_url = env::var("MISP_URL").unwrap_or_else(|_| "https://localhost".to_string());

        let misp_api_key = env::var("MISP_API_KEY")
            .map_err(|_| anyhow::anyhow!("MISP_API_KEY environment variable is required"))?;

        let verify_ssl = env::var("VERIFY_SSL")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";

        tracing::debug!(?misp_url, ?verify_ssl, "Creating MISP client with API key");

        let misp_client = MispClient::new(misp_url, misp_api_key, verify_ssl)?;

        Ok(Self {
            misp_client: Arc::new(misp_client),
        })
    }

    #[tool(
        name = "get_misp_event",
        description = "Retrieves a MISP event by its ID. Returns the event summary followed by one item per attribute."
    )]
    async fn get_misp_event(
        &self,
        #[tool(aggr)] params: GetEventParams,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(event_id = %params.event_id, "Retrieving MISP event by ID");

        match self.misp_client.get_event(&params.event_id).await {
            Ok(reply) => {
                let mut content = vec![Content::text(format_event(&reply.event))];
                content.extend(
                    reply
                        .event
                        .attributes
                        .iter()
                        .map(|attribute| Content::text(format_attribute(attribute))),
                );
                Ok(CallToolResult::success(content))
            }
            Err(e) => {
                let err_msg = format!(
                    "Error retrieving event {} from MISP: {}",
                    params.event_id, e
                );
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }

    #[tool(
        name = "search_misp_events_by_tag",
        description = "Searches MISP events carrying a tag. Returns formatted event information including ID, info, threat level and tags."
    )]
    async fn search_misp_events_by_tag(
        &self,
        #[tool(aggr)] params: SearchEventsByTagParams,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(100) as usize;

        tracing::info!(tag = %params.tag, limit = %limit, "Searching MISP events by tag");

        match self.misp_client.search_event_tag(&params.tag).await {
            Ok(list) => {
                if list.events.is_empty() {
                    tracing::info!("No MISP events found for tag. Returning standard message.");
                    return Ok(CallToolResult::success(vec![Content::text(format!(
                        "No MISP events found with tag {}.",
                        params.tag
                    ))]));
                }

                let mcp_content_items: Vec<Content> = list
                    .events
                    .iter()
                    .take(limit)
                    .map(|event| Content::text(format_event(event)))
                    .collect();

                tracing::info!(
                    "Successfully processed {} of {} events into MCP content items",
                    mcp_content_items.len(),
                    list.events.len()
                );
                Ok(CallToolResult::success(mcp_content_items))
            }
            Err(e) => {
                let err_msg = format!(
                    "Error searching MISP events with tag {}: {}",
                    params.tag, e
                );
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }

    #[tool(
        name = "create_misp_event",
        description = "Creates a new event in MISP. Returns the newly created event information."
    )]
    async fn create_misp_event(
        &self,
        #[tool(aggr)] params: CreateEventParams,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(info = %params.info, "Creating MISP event");

        let event = Event {
            info: params.info,
            distribution: checked_code("distribution", params.distribution, 5),
            analysis: checked_code("analysis", params.analysis, 2),
            threat_level_id: match params.threat_level_id {
                Some(0) => {
                    tracing::warn!("Invalid threat level 0, leaving it to the server default");
                    String::new()
                }
                other => checked_code("threat level", other, 4),
            },
            date: params.date.unwrap_or_default(),
            ..Default::default()
        };

        match self.misp_client.create_event(&event).await {
            Ok(reply) => {
                let formatted_text =
                    format!("Successfully created event.\n{}", format_event(&reply.event));
                Ok(CallToolResult::success(vec![Content::text(formatted_text)]))
            }
            Err(e) => {
                let err_msg = format!("Error creating event in MISP: {}", e);
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }

    #[tool(
        name = "add_misp_event_tags",
        description = "Attaches tags to a MISP event, one request per tag. Stops at the first tag MISP rejects."
    )]
    async fn add_misp_event_tags(
        &self,
        #[tool(aggr)] params: AddEventTagsParams,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(event_id = %params.event_id, count = params.tags.len(), "Tagging MISP event");

        match self
            .misp_client
            .add_tags_to_event(&params.event_id, &params.tags)
            .await
        {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Successfully added {} tags to event {}: {}",
                params.tags.len(),
                params.event_id,
                params.tags.join(", ")
            ))])),
            Err(e) => {
                let err_msg = format!("Error adding tags to event {}: {}", params.event_id, e);
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }

    #[tool(
        name = "add_misp_attributes",
        description = "Adds attributes (indicators) to a MISP event. Reports duplicates that already exist on the event."
    )]
    async fn add_misp_attributes(
        &self,
        #[tool(aggr)] params: AddAttributesParams,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            event_id = %params.event_id,
            count = params.attributes.len(),
            "Adding attributes to MISP event"
        );

        let attributes: Vec<Attribute> = params
            .attributes
            .into_iter()
            .map(|attribute| Attribute {
                attribute_type: attribute.attribute_type,
                category: attribute.category.unwrap_or_default(),
                value: attribute.value,
                to_ids: attribute.to_ids.unwrap_or(false),
                comment: attribute.comment.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        match self
            .misp_client
            .add_attributes_to_event(&params.event_id, &attributes)
            .await
        {
            Ok(reply) => {
                let mut content = vec![Content::text(format!(
                    "Successfully added {} attributes to event {}.",
                    reply.attributes.len(),
                    params.event_id
                ))];
                content.extend(
                    reply
                        .attributes
                        .iter()
                        .map(|attribute| Content::text(format_attribute(attribute))),
                );
                Ok(CallToolResult::success(content))
            }
            Err(MispApiError::AttributeAlreadyExists(reply)) => {
                let err_msg = format!(
                    "A similar attribute already exists on event {}. MISP replied: {}",
                    params.event_id,
                    String::from_utf8_lossy(&reply.raw)
                );
                tracing::warn!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
            Err(e) => {
                let err_msg = format!(
                    "Error adding attributes to event {}: {}",
                    params.event_id, e
                );
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }

    #[tool(
        name = "add_misp_sighting",
        description = "Records a sighting of a MISP attribute."
    )]
    async fn add_misp_sighting(
        &self,
        #[tool(aggr)] params: AddSightingParams,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(attribute_id = %params.attribute_id, "Adding MISP sighting");

        match self.misp_client.add_sighting(&params.attribute_id).await {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Successfully recorded sighting for attribute {}.",
                params.attribute_id
            ))])),
            Err(e) => {
                let err_msg = format!(
                    "Error adding sighting for attribute {}: {}",
                    params.attribute_id, e
                );
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }

    #[tool(
        name = "get_misp_object_templates",
        description = "Lists the object templates known to MISP, with their required fields."
    )]
    async fn get_misp_object_templates(
        &self,
        #[tool(aggr)] params: GetObjectTemplatesParams,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(100) as usize;

        tracing::info!(limit = %limit, "Retrieving MISP object templates");

        match self.misp_client.get_object_templates_list().await {
            Ok(list) => {
                if list.templates.is_empty() {
                    return Ok(CallToolResult::success(vec![Content::text(
                        "No MISP object templates found.",
                    )]));
                }

                let mcp_content_items: Vec<Content> = list
                    .templates
                    .iter()
                    .take(limit)
                    .map(|entry| Content::text(format_object_template(entry)))
                    .collect();
                Ok(CallToolResult::success(mcp_content_items))
            }
            Err(e) => {
                let err_msg = format!("Error retrieving object templates from MISP: {}", e);
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }

    #[tool(
        name = "add_misp_object",
        description = "Adds an object built from an object template to a MISP event. Returns MISP's reply."
    )]
    async fn add_misp_object(
        &self,
        #[tool(aggr)] params: AddObjectParams,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(
            event_id = %params.event_id,
            template_id = %params.template_id,
            "Adding MISP object"
        );

        let body = match serde_json::to_vec(&params.object) {
            Ok(body) => body,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Invalid object document: {}",
                    e
                ))]))
            }
        };

        match self
            .misp_client
            .add_object(&params.event_id, &params.template_id, body)
            .await
        {
            Ok(reply) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Successfully added object to event {}.\nMISP response: {}",
                params.event_id,
                reply.text()
            ))])),
            Err(e) => {
                let err_msg = format!("Error adding object to event {}: {}", params.event_id, e);
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }

    #[tool(
        name = "search_misp_attributes",
        description = "Runs a MISP attribute restSearch with the given query document. Returns formatted attribute information."
    )]
    async fn search_misp_attributes(
        &self,
        #[tool(aggr)] params: SearchAttributesParams,
    ) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(100) as usize;

        tracing::info!(query = %params.query, limit = %limit, "Searching MISP attributes");

        let body = match serde_json::to_vec(&params.query) {
            Ok(body) => body,
            Err(e) => {
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Invalid search query: {}",
                    e
                ))]))
            }
        };

        match self.misp_client.search_attributes_raw(body).await {
            Ok(result) => {
                if result.attributes.is_empty() {
                    return Ok(CallToolResult::success(vec![Content::text(
                        "No MISP attributes matched the query.",
                    )]));
                }

                let mcp_content_items: Vec<Content> = result
                    .attributes
                    .iter()
                    .take(limit)
                    .map(|attribute| Content::text(format_attribute(attribute)))
                    .collect();
                Ok(CallToolResult::success(mcp_content_items))
            }
            Err(e) => {
                let err_msg = format!("Error searching MISP attributes: {}", e);
                tracing::error!("{}", err_msg);
                Ok(CallToolResult::error(vec![Content::text(err_msg)]))
            }
        }
    }
}

#[tool(tool_box)]
impl ServerHandler for MispToolsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_prompts()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "This server provides tools to interact with a MISP threat-intelligence platform.\n\
                Available tools:\n\
                - 'get_misp_event': Retrieves an event and its attributes by ID.\n\
                - 'search_misp_events_by_tag': Lists events carrying a tag. Optional 'limit' (defaults to 100).\n\
                - 'create_misp_event': Creates an event. Requires 'info'; optional 'distribution', \
                'threat_level_id', 'analysis' and 'date'.\n\
                - 'add_misp_event_tags': Attaches tags to an event.\n\
                - 'add_misp_attributes': Adds attributes to an event and reports duplicates.\n\
                - 'add_misp_sighting': Records a sighting for an attribute.\n\
                - 'get_misp_object_templates': Lists object templates. Optional 'limit' (defaults to 100).\n\
                - 'add_misp_object': Adds a template-based object to an event.\n\
                - 'search_misp_attributes': Runs an attribute restSearch query. Optional 'limit' (defaults to 100)."
                    .to_string(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting MISP MCP Server...");

    let server = MispToolsServer::new()
        .inspect_err(|e| tracing::error!("Error initializing MISP tools server: {:?}", e))?;

    tracing::info!("Using stdio transport");
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    service.waiting().await?;
    Ok(())
}
