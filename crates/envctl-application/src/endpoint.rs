//! MCP endpoint document
//!
//! Editors and agents consume the aggregator through one SSE endpoint; this
//! helper renders the client-side configuration document for it.

use serde_json::{Value, json};

/// The `{mcpServers: {aggregator: …}}` document pointing at the local
/// aggregator port.
#[must_use]
pub fn aggregator_endpoint_config(port: u16) -> Value {
    json!({
        "mcpServers": {
            "aggregator": {
                "url": format!("http://localhost:{port}/sse"),
                "description": "envctl MCP aggregator (all enabled servers behind one endpoint)",
            }
        }
    })
}
