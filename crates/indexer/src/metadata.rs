//! Agent registration file resolution.
//!
//! The registration file is an off-chain JSON document referenced by the
//! agent's on-chain URI. Resolution is best-effort: callers treat any error
//! as "no metadata" and keep indexing.

use agentindex_core::{AgentMetadata, DEFAULT_IPFS_GATEWAY};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::config::MetadataConfig;

const DEFAULT_MAX_BYTES: usize = 1_048_576;

/// Resolves a metadata URI into normalized agent metadata.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Fetch and normalize the document at `uri`.
    async fn resolve(&self, uri: &str) -> Result<AgentMetadata>;
}

/// HTTP(S), IPFS-gateway and `data:` URI resolver.
#[derive(Clone)]
pub struct HttpMetadataResolver {
    client: Client,
    ipfs_gateway: String,
    max_bytes: usize,
}

impl HttpMetadataResolver {
    /// Build a resolver with explicit settings.
    pub fn new(ipfs_gateway: String, max_bytes: usize, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("agentindex-indexer/metadata")
            .build()
            .context("Failed to build metadata HTTP client")?;

        Ok(Self {
            client,
            ipfs_gateway,
            max_bytes,
        })
    }

    /// Build a resolver from the `[metadata]` config section.
    pub fn from_config(config: &MetadataConfig) -> Result<Self> {
        Self::new(
            config.ipfs_gateway.clone(),
            config.max_document_bytes,
            config.timeout_secs,
        )
    }

    fn gateway_url(&self, uri: &str) -> Option<String> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Some(uri.to_string());
        }

        if let Some(path) = uri.strip_prefix("ipfs://") {
            let path = path.strip_prefix("ipfs/").unwrap_or(path);
            let path = path.trim_start_matches('/');
            let gateway = self.ipfs_gateway.trim_end_matches('/');
            return Some(format!("{}/{}", gateway, path));
        }

        None
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch metadata from {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Metadata fetch from {} returned {}", url, status);
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                bail!("Metadata document too large: {} bytes", len);
            }
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read metadata response")?;
        if bytes.len() > self.max_bytes {
            bail!("Metadata document too large: {} bytes", bytes.len());
        }

        Ok(bytes.to_vec())
    }
}

impl Default for HttpMetadataResolver {
    fn default() -> Self {
        Self {
            client: Client::new(),
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[async_trait]
impl MetadataResolver for HttpMetadataResolver {
    async fn resolve(&self, uri: &str) -> Result<AgentMetadata> {
        let uri = uri.trim();
        if uri.is_empty() {
            bail!("Empty metadata URI");
        }

        let bytes = if uri.starts_with("data:") {
            decode_data_uri(uri)?
        } else {
            let Some(url) = self.gateway_url(uri) else {
                bail!("Unsupported metadata URI scheme: {}", uri);
            };
            self.fetch(&url).await?
        };

        if bytes.len() > self.max_bytes {
            bail!("Metadata document too large: {} bytes", bytes.len());
        }

        let json: Value = serde_json::from_slice(&bytes).context("Invalid metadata JSON")?;
        parse_registration_file(&json)
    }
}

/// Decode an inline `data:application/json[;base64],...` document.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let rest = uri.strip_prefix("data:").context("Not a data URI")?;
    let (header, payload) = rest.split_once(',').context("Malformed data URI")?;

    let mut parts = header.split(';');
    let media_type = parts.next().unwrap_or_default().trim();
    if !media_type.is_empty() && !media_type.eq_ignore_ascii_case("application/json") {
        bail!("Unsupported data URI media type: {}", media_type);
    }

    if parts.any(|param| param.trim().eq_ignore_ascii_case("base64")) {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .context("Invalid base64 in data URI")
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

/// Normalize a registration file into [`AgentMetadata`].
///
/// Service tags are taken from the `name` of each `services` and `endpoints`
/// entry, then the optional `tags` array; they are trimmed and de-duplicated
/// with first-seen order kept.
pub fn parse_registration_file(json: &Value) -> Result<AgentMetadata> {
    let Some(object) = json.as_object() else {
        bail!("Registration file is not a JSON object");
    };

    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };

    let mut services: Vec<String> = Vec::new();
    let mut push_tag = |tag: &str| {
        let tag = tag.trim();
        if !tag.is_empty() && !services.iter().any(|existing| existing == tag) {
            services.push(tag.to_string());
        }
    };

    for key in ["services", "endpoints"] {
        if let Some(entries) = object.get(key).and_then(Value::as_array) {
            for entry in entries {
                match entry {
                    Value::String(name) => push_tag(name.as_str()),
                    Value::Object(fields) => {
                        if let Some(name) = fields.get("name").and_then(Value::as_str) {
                            push_tag(name);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some(tags) = object.get("tags").and_then(Value::as_array) {
        for tag in tags.iter().filter_map(Value::as_str) {
            push_tag(tag);
        }
    }

    let image = object
        .get("image")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|image| !image.is_empty())
        .map(str::to_string);

    Ok(AgentMetadata {
        name: text("name"),
        description: text("description"),
        services,
        image,
        active: object.get("active").and_then(Value::as_bool),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_registration_file() {
        let doc = json!({
            "type": "https://eips.ethereum.org/EIPS/eip-8004#registration-v1",
            "name": "  Price Oracle ",
            "description": "Aggregated DeFi prices",
            "image": "ipfs://bafy-image",
            "services": [
                {"name": "A2A", "endpoint": "https://agent.example/a2a", "version": "0.3"},
                {"name": "MCP", "endpoint": "https://agent.example/mcp"}
            ],
            "endpoints": [{"name": "A2A", "endpoint": "https://other.example"}],
            "tags": ["oracle", " defi ", ""],
            "active": true
        });

        let metadata = parse_registration_file(&doc).unwrap();
        assert_eq!(metadata.name, "Price Oracle");
        assert_eq!(metadata.description, "Aggregated DeFi prices");
        assert_eq!(metadata.image.as_deref(), Some("ipfs://bafy-image"));
        assert_eq!(metadata.services, vec!["A2A", "MCP", "oracle", "defi"]);
        assert_eq!(metadata.active, Some(true));
    }

    #[test]
    fn test_parse_minimal_registration_file() {
        let metadata = parse_registration_file(&json!({"name": "Bare"})).unwrap();
        assert_eq!(metadata.name, "Bare");
        assert!(metadata.description.is_empty());
        assert!(metadata.services.is_empty());
        assert!(metadata.image.is_none());
        assert!(metadata.active.is_none());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(parse_registration_file(&json!(["not", "an", "object"])).is_err());
        assert!(parse_registration_file(&json!("text")).is_err());
    }

    #[test]
    fn test_parse_ignores_wrong_field_types() {
        let doc = json!({
            "name": 42,
            "services": "MCP",
            "tags": [1, "ok"],
            "active": "yes"
        });
        let metadata = parse_registration_file(&doc).unwrap();
        assert!(metadata.name.is_empty());
        assert_eq!(metadata.services, vec!["ok"]);
        assert!(metadata.active.is_none());
    }

    #[test]
    fn test_decode_data_uri_plain_and_base64() {
        let plain = decode_data_uri(r#"data:application/json,{"name":"Inline"}"#).unwrap();
        assert_eq!(plain, br#"{"name":"Inline"}"#.to_vec());

        let encoded = base64::engine::general_purpose::STANDARD.encode(r#"{"name":"B64"}"#);
        let uri = format!("data:application/json;base64,{}", encoded);
        assert_eq!(decode_data_uri(&uri).unwrap(), br#"{"name":"B64"}"#.to_vec());
    }

    #[test]
    fn test_decode_data_uri_rejects_other_media_types() {
        assert!(decode_data_uri("data:text/html,<p>hi</p>").is_err());
        assert!(decode_data_uri("data:application/json").is_err());
    }

    #[test]
    fn test_gateway_url() {
        let resolver =
            HttpMetadataResolver::new("https://gateway.example/ipfs/".to_string(), 1024, 1)
                .unwrap();

        assert_eq!(
            resolver.gateway_url("ipfs://bafy/agent.json").as_deref(),
            Some("https://gateway.example/ipfs/bafy/agent.json")
        );
        assert_eq!(
            resolver.gateway_url("ipfs://ipfs/bafy").as_deref(),
            Some("https://gateway.example/ipfs/bafy")
        );
        assert_eq!(
            resolver.gateway_url("https://agent.example/a.json").as_deref(),
            Some("https://agent.example/a.json")
        );
        assert!(resolver.gateway_url("ar://tx").is_none());
    }

    #[tokio::test]
    async fn test_resolve_inline_document() {
        let resolver = HttpMetadataResolver::default();
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(r#"{"name":"Inline","services":[{"name":"MCP"}],"active":false}"#);
        let metadata = resolver
            .resolve(&format!("data:application/json;base64,{}", encoded))
            .await
            .unwrap();

        assert_eq!(metadata.name, "Inline");
        assert_eq!(metadata.services, vec!["MCP"]);
        assert_eq!(metadata.active, Some(false));
    }

    #[tokio::test]
    async fn test_resolve_rejects_unknown_scheme_and_oversize() {
        let resolver = HttpMetadataResolver::default();
        assert!(resolver.resolve("").await.is_err());
        assert!(resolver.resolve("ftp://agent").await.is_err());

        let small = HttpMetadataResolver::new(DEFAULT_IPFS_GATEWAY.to_string(), 8, 1).unwrap();
        assert!(small
            .resolve(r#"data:application/json,{"name":"too long"}"#)
            .await
            .is_err());
    }
}
