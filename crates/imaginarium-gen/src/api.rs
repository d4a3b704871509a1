//! Remote service seams and the Blockade Labs HTTP adapter
//!
//! The orchestrator only depends on the four traits below; `BlockadeClient`
//! implements them over HTTP. Wire parsing lives in standalone functions so
//! the formats can be exercised without a network.

use async_trait::async_trait;
use imaginarium_core::{ImaginariumError, Result};
use std::collections::HashMap;
use std::time::Duration;

use crate::field::{FieldKind, Generator, GeneratorField, ParamOption, ParamSpec, SkyboxStyle};

const DEFAULT_API_URL: &str = "https://backend.blockadelabs.com/api";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Submits generation requests. An empty returned id signals "not created".
#[async_trait]
pub trait SubmissionService: Send + Sync {
    async fn create_imagine(
        &self,
        fields: &[GeneratorField],
        generator: &str,
        api_key: &str,
    ) -> Result<String>;

    async fn create_skybox(
        &self,
        fields: &[GeneratorField],
        style_id: i32,
        api_key: &str,
    ) -> Result<String>;
}

/// Queries job status. An empty map signals "still running"; a completed
/// job carries at least `textureUrl` and `prompt`.
#[async_trait]
pub trait StatusService: Send + Sync {
    async fn get_imagine(&self, imagine_id: &str, api_key: &str)
        -> Result<HashMap<String, String>>;
}

/// Downloads raw bytes from a result URL
#[async_trait]
pub trait FetchService: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Lists the generator and style catalogs
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn get_generators(&self, api_key: &str) -> Result<Vec<Generator>>;
    async fn get_skybox_styles(&self, api_key: &str) -> Result<Vec<SkyboxStyle>>;
}

/// HTTP client for the Blockade Labs backend
pub struct BlockadeClient {
    http: reqwest::Client,
    base_url: String,
}

impl BlockadeClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_API_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ImaginariumError::ServiceError(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(&self, url: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ImaginariumError::ServiceError(format!("Request failed: {}", e)))?
            // a 4xx/5xx with a parseable body is still a failed call
            .error_for_status()
            .map_err(|e| ImaginariumError::ServiceError(format!("Request failed: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| ImaginariumError::ServiceError(format!("Failed to parse response: {}", e)))
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ImaginariumError::ServiceError(format!("Request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ImaginariumError::ServiceError(format!("Request failed: {}", e)))?;

        response
            .json()
            .await
            .map_err(|e| ImaginariumError::ServiceError(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl SubmissionService for BlockadeClient {
    async fn create_imagine(
        &self,
        fields: &[GeneratorField],
        generator: &str,
        api_key: &str,
    ) -> Result<String> {
        let url = format!("{}/imagine/requests?api_key={}", self.base_url, api_key);
        let payload = build_submission_payload(fields, Some(generator), None);
        let response = self.post_json(&url, &payload).await?;
        Ok(parse_create_response(&response))
    }

    async fn create_skybox(
        &self,
        fields: &[GeneratorField],
        style_id: i32,
        api_key: &str,
    ) -> Result<String> {
        let url = format!("{}/skybox?api_key={}", self.base_url, api_key);
        let payload = build_submission_payload(fields, None, Some(style_id));
        let response = self.post_json(&url, &payload).await?;
        Ok(parse_create_response(&response))
    }
}

#[async_trait]
impl StatusService for BlockadeClient {
    async fn get_imagine(
        &self,
        imagine_id: &str,
        api_key: &str,
    ) -> Result<HashMap<String, String>> {
        let url = format!(
            "{}/imagine/requests/obfuscated-id/{}?api_key={}",
            self.base_url, imagine_id, api_key
        );
        let response = self.get_json(&url).await?;
        Ok(parse_imagine_status(&response))
    }
}

#[async_trait]
impl FetchService for BlockadeClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ImaginariumError::ServiceError(format!("Download failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ImaginariumError::ServiceError(format!("Download failed: {}", e)))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImaginariumError::ServiceError(format!("Download failed: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl CatalogService for BlockadeClient {
    async fn get_generators(&self, api_key: &str) -> Result<Vec<Generator>> {
        let url = format!("{}/generators?api_key={}", self.base_url, api_key);
        let response = self.get_json(&url).await?;
        parse_generators(&response)
    }

    async fn get_skybox_styles(&self, api_key: &str) -> Result<Vec<SkyboxStyle>> {
        let url = format!("{}/skybox/styles?api_key={}", self.base_url, api_key);
        let response = self.get_json(&url).await?;
        parse_skybox_styles(&response)
    }
}

/// Flatten a field set into the JSON submission body
fn build_submission_payload(
    fields: &[GeneratorField],
    generator: Option<&str>,
    style_id: Option<i32>,
) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if let Some(generator) = generator {
        body.insert(
            "generator".to_string(),
            serde_json::Value::String(generator.to_string()),
        );
    }
    if let Some(style_id) = style_id {
        body.insert("skybox_style_id".to_string(), serde_json::json!(style_id));
    }
    for field in fields {
        body.insert(
            field.key.clone(),
            serde_json::Value::String(field.submission_value().to_string()),
        );
    }
    serde_json::Value::Object(body)
}

/// Extract the obfuscated job id from a create response.
///
/// Returns the empty string when the response carries no id, which the
/// caller treats as "job not created".
pub fn parse_create_response(response: &serde_json::Value) -> String {
    response
        .get("request")
        .and_then(|r| r.get("obfuscated_id"))
        .or_else(|| response.get("obfuscated_id"))
        .and_then(|id| id.as_str())
        .unwrap_or("")
        .to_string()
}

/// Flatten a status response into the result map.
///
/// Only a `complete` request maps to a non-empty payload; anything else
/// means the job is still running.
pub fn parse_imagine_status(response: &serde_json::Value) -> HashMap<String, String> {
    let mut result = HashMap::new();

    let request = match response.get("request") {
        Some(request) => request,
        None => return result,
    };

    let status = request.get("status").and_then(|s| s.as_str()).unwrap_or("");
    if status != "complete" {
        return result;
    }

    if let Some(url) = request.get("file_url").and_then(|u| u.as_str()) {
        result.insert("textureUrl".to_string(), url.to_string());
    }
    if let Some(prompt) = request.get("prompt").and_then(|p| p.as_str()) {
        result.insert("prompt".to_string(), prompt.to_string());
    }

    result
}

/// Parse the generator catalog, preserving each schema's declared order
pub fn parse_generators(response: &serde_json::Value) -> Result<Vec<Generator>> {
    let entries = response
        .as_array()
        .or_else(|| response.get("generators").and_then(|g| g.as_array()))
        .ok_or_else(|| {
            ImaginariumError::ParseError("Generator catalog is not an array".to_string())
        })?;

    let mut generators = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry
            .get("generator")
            .and_then(|g| g.as_str())
            .ok_or_else(|| {
                ImaginariumError::ParseError("Generator entry has no name".to_string())
            })?;

        let mut params = Vec::new();
        if let Some(schema) = entry.get("params").and_then(|p| p.as_object()) {
            // serde_json's preserve_order feature keeps the declared order
            for (key, value) in schema {
                params.push((key.clone(), parse_param_spec(key, value)));
            }
        }

        generators.push(Generator {
            name: name.to_string(),
            params,
        });
    }

    Ok(generators)
}

fn parse_param_spec(key: &str, value: &serde_json::Value) -> ParamSpec {
    let kind = match value.get("type").and_then(|t| t.as_str()).unwrap_or("text") {
        "switch" => FieldKind::Boolean,
        "select" => FieldKind::SingleSelect,
        _ => FieldKind::Text,
    };

    let options = value
        .get("options")
        .and_then(|o| o.as_array())
        .map(|opts| {
            opts.iter()
                .filter_map(|opt| {
                    Some(ParamOption {
                        label: opt.get("label")?.as_str()?.to_string(),
                        value: opt.get("value")?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ParamSpec {
        name: value
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or(key)
            .to_string(),
        kind,
        default_value: value
            .get("default_value")
            .and_then(|d| d.as_str())
            .unwrap_or("")
            .to_string(),
        required: value
            .get("required")
            .and_then(|r| r.as_bool())
            .unwrap_or(false),
        options,
    }
}

/// Parse the skybox style catalog
pub fn parse_skybox_styles(response: &serde_json::Value) -> Result<Vec<SkyboxStyle>> {
    let entries = response
        .as_array()
        .or_else(|| response.get("styles").and_then(|s| s.as_array()))
        .ok_or_else(|| {
            ImaginariumError::ParseError("Style catalog is not an array".to_string())
        })?;

    entries
        .iter()
        .map(|entry| {
            serde_json::from_value(entry.clone())
                .map_err(|e| ImaginariumError::ParseError(format!("Invalid style entry: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::build_generator_fields;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serve one canned HTTP response on an ephemeral port
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_unauthorized_status_query_is_an_error() {
        let base = serve_once("HTTP/1.1 401 Unauthorized", r#"{"error":"unauthorized"}"#).await;
        let client = BlockadeClient::with_base_url(&base).unwrap();

        // must surface as an error, never as an empty "still running" map
        let err = client.get_imagine("obf-1", "bad-key").await.unwrap_err();
        assert!(matches!(err, ImaginariumError::ServiceError(_)));
    }

    #[tokio::test]
    async fn test_rejected_submission_is_an_error() {
        let base = serve_once("HTTP/1.1 403 Forbidden", r#"{"error":"quota exceeded"}"#).await;
        let client = BlockadeClient::with_base_url(&base).unwrap();

        let err = client
            .create_imagine(&[], "stable", "bad-key")
            .await
            .unwrap_err();
        assert!(matches!(err, ImaginariumError::ServiceError(_)));
    }

    #[tokio::test]
    async fn test_failed_download_is_an_error_not_bytes() {
        let base = serve_once("HTTP/1.1 500 Internal Server Error", "<html>oops</html>").await;
        let client = BlockadeClient::with_base_url(&base).unwrap();

        let err = client
            .fetch(&format!("{}/images/1.png", base))
            .await
            .unwrap_err();
        assert!(matches!(err, ImaginariumError::ServiceError(_)));
    }

    #[test]
    fn test_parse_create_response_nested() {
        let json = serde_json::json!({"request": {"obfuscated_id": "obf-abc123"}});
        assert_eq!(parse_create_response(&json), "obf-abc123");
    }

    #[test]
    fn test_parse_create_response_flat() {
        let json = serde_json::json!({"obfuscated_id": "obf-xyz"});
        assert_eq!(parse_create_response(&json), "obf-xyz");
    }

    #[test]
    fn test_parse_create_response_missing_id() {
        let json = serde_json::json!({"error": "quota exceeded"});
        assert_eq!(parse_create_response(&json), "");
    }

    #[test]
    fn test_parse_imagine_status_pending_is_empty() {
        let json = serde_json::json!({"request": {"status": "pending"}});
        assert!(parse_imagine_status(&json).is_empty());
    }

    #[test]
    fn test_parse_imagine_status_complete() {
        let json = serde_json::json!({
            "request": {
                "status": "complete",
                "file_url": "https://x/images/1.png",
                "prompt": "a red castle"
            }
        });
        let result = parse_imagine_status(&json);
        assert_eq!(result.get("textureUrl").unwrap(), "https://x/images/1.png");
        assert_eq!(result.get("prompt").unwrap(), "a red castle");
    }

    #[test]
    fn test_parse_generators_preserves_schema_order() {
        let json: serde_json::Value = serde_json::from_str(
            r#"[{
                "generator": "stable",
                "params": {
                    "prompt": {"name": "Prompt", "type": "text", "required": true},
                    "return_depth": {"name": "Return depth", "type": "switch", "default_value": "false"},
                    "image_type": {
                        "name": "Image type",
                        "type": "select",
                        "options": [
                            {"label": "JPG", "value": "jpg"},
                            {"label": "PNG", "value": "png"}
                        ]
                    }
                }
            }]"#,
        )
        .unwrap();

        let generators = parse_generators(&json).unwrap();
        assert_eq!(generators.len(), 1);
        assert_eq!(generators[0].name, "stable");

        let keys: Vec<&str> = generators[0].params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["prompt", "return_depth", "image_type"]);

        let (_, image_type) = &generators[0].params[2];
        assert_eq!(image_type.kind, FieldKind::SingleSelect);
        assert_eq!(image_type.options.len(), 2);

        let (_, depth) = &generators[0].params[1];
        assert_eq!(depth.kind, FieldKind::Boolean);
    }

    #[test]
    fn test_parse_generators_rejects_non_array() {
        let json = serde_json::json!({"error": "unauthorized"});
        assert!(parse_generators(&json).is_err());
    }

    #[test]
    fn test_parse_skybox_styles() {
        let json = serde_json::json!([
            {"id": 5, "name": "Fantasy"},
            {"id": 9, "name": "Anime"}
        ]);
        let styles = parse_skybox_styles(&json).unwrap();
        assert_eq!(styles.len(), 2);
        assert_eq!(styles[0].id, 5);
        assert_eq!(styles[1].name, "Anime");
    }

    #[test]
    fn test_submission_payload_flattens_fields() {
        let generators = parse_generators(
            &serde_json::from_str::<serde_json::Value>(
                r#"[{
                    "generator": "stable",
                    "params": {
                        "prompt": {"name": "Prompt", "type": "text"},
                        "return_depth": {"name": "Return depth", "type": "switch"}
                    }
                }]"#,
            )
            .unwrap(),
        )
        .unwrap();

        let styles = vec![SkyboxStyle {
            id: 5,
            name: "Fantasy".to_string(),
        }];
        let mut fields = build_generator_fields(&generators[0], &styles);
        fields[0].value = "a red castle".to_string();

        let payload = build_submission_payload(&fields, Some("stable"), None);
        assert_eq!(payload["generator"], "stable");
        assert_eq!(payload["prompt"], "a red castle");
        assert_eq!(payload["return_depth"], "true");
        assert_eq!(payload["skybox_style_id"], "5: Fantasy");
    }
}
