//! # MISP client and MCP Server
//!
//! This library provides a typed client for the REST API of the MISP
//! threat-intelligence platform, and backs an MCP (Model Context Protocol)
//! server that exposes the same operations to AI models and automation
//! scripts.
//!
//! ## Features
//!
//! - Retrieve events by ID and search events by tag
//! - Create events and attach tags, attributes and objects to them
//! - Record sightings on attributes
//! - Run raw attribute searches and list object templates
//! - Every reply keeps the raw response bytes next to the decoded value
//!
//! ## Usage
//!
//! ```no_run
//! # async fn run() -> Result<(), mcp_server_misp::MispApiError> {
//! use mcp_server_misp::MispClient;
//!
//! let client = MispClient::new(
//!     "https://misp.example.org".to_string(),
//!     "my-api-key".to_string(),
//!     true,
//! )?;
//! let reply = client.get_event("42").await?;
//! println!("{} ({} bytes)", reply.event.info, reply.raw.len());
//! # Ok(())
//! # }
//! ```

pub mod misp;

pub use misp::{client::MispClient, error::MispApiError, models};
