// Web tools for fetching external content

use crate::error::{RegistryError, ToolError};
use crate::protocol::CallToolResult;
use crate::tools::{json_schema_boolean, json_schema_object, json_schema_string, ToolDescriptor, ToolHandler};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Largest body returned to the agent
const MAX_BODY_BYTES: usize = 100_000;

/// Domains reachable when no explicit allow-list is configured
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "docs.rs",
    "doc.rust-lang.org",
    "developer.mozilla.org",
    "github.com",
    "raw.githubusercontent.com",
    "crates.io",
    "pypi.org",
    "wikipedia.org",
];

pub fn fetch_descriptor(allowed_domains: Vec<String>) -> ToolDescriptor {
    let description = format!(
        "Fetch content from a web URL. Only allowed domains: {}",
        allowed_domains.join(", ")
    );
    ToolDescriptor::new(
        "web_fetch",
        description,
        json_schema_object(
            serde_json::json!({
                "url": json_schema_string("The URL to fetch"),
                "include_headers": json_schema_boolean("Include HTTP response headers in output (default: false)")
            }),
            vec!["url"],
        ),
        move |_| {
            let tool = WebFetchTool::with_allowed_domains(allowed_domains.clone()).map_err(|e| {
                RegistryError::Init {
                    tool: "web_fetch".to_string(),
                    message: e.to_string(),
                }
            })?;
            Ok(Arc::new(tool) as Arc<dyn ToolHandler>)
        },
    )
    .requires("web")
}

/// Tool to fetch content from web URLs
pub struct WebFetchTool {
    allowed_domains: Vec<String>,
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn with_allowed_domains(domains: Vec<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("openpact-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            allowed_domains: domains.into_iter().map(|d| d.to_lowercase()).collect(),
            client,
        })
    }

    fn is_domain_allowed(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.allowed_domains
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
    }
}

#[derive(Debug, Deserialize)]
struct WebFetchArgs {
    url: String,
    #[serde(default)]
    include_headers: bool,
}

#[async_trait::async_trait]
impl ToolHandler for WebFetchTool {
    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let args: WebFetchArgs = serde_json::from_value(arguments)?;

        let url = Url::parse(&args.url)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid URL: {}", e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ToolError::Denied(format!(
                "only HTTP/HTTPS URLs are supported, got: {}",
                url.scheme()
            )));
        }
        if !self.is_domain_allowed(&url) {
            return Err(ToolError::Denied(format!(
                "domain not allowed: {}",
                url.host_str().unwrap_or("unknown")
            )));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Failed(format!("failed to read response body: {}", e)))?;

        let mut output = String::new();
        if args.include_headers {
            output.push_str(&format!("HTTP Status: {}\n\nHeaders:\n", status));
            for (name, value) in headers.iter() {
                output.push_str(&format!("  {}: {}\n", name, value.to_str().unwrap_or("<non-utf8>")));
            }
            output.push_str("\nBody:\n");
        }
        output.push_str(&body);

        if output.len() > MAX_BODY_BYTES {
            let mut cut = MAX_BODY_BYTES;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str("\n\n... (truncated, content too large)");
        }

        Ok(CallToolResult {
            content: vec![crate::protocol::ToolContent::text(output)],
            is_error: (!status.is_success()).then_some(true),
        })
    }
}
