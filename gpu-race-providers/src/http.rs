use crate::{inventory, InstanceProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use gpu_race_common::{instance_id_from_value, Instance};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// REST client for the marketplace backend (`/instances`).
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct ListInstancesResponse {
    #[serde(default)]
    instances: Vec<serde_json::Value>,
}

/// Rows that do not parse are skipped so one bad row cannot hide the others.
fn parse_instances(rows: Vec<serde_json::Value>) -> Vec<Instance> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<Instance>(row.clone()) {
            Ok(instance) => Some(instance),
            Err(e) => {
                warn!("⚠️ [provider-http] Skipping unreadable instance row {}: {}", row, e);
                None
            }
        })
        .collect()
}

impl HttpProvider {
    pub fn new(base_url: String, api_token: String) -> Result<Self> {
        // Default reqwest client has no overall timeout. A stalled backend would hang a poll tick.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to build HTTP client")?;
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let api_token = api_token.trim().to_string();
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_token))
                .context("API token is not a valid header value")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// Pulls the human readable message out of an error response.
/// Backends use `detail`, `message` or `error`; otherwise the raw body is used.
async fn error_message(resp: Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    extract_error_message(&text)
}

fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message", "error"] {
            match json.get(key) {
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                    return s.trim().to_string()
                }
                Some(v) if !v.is_null() => return v.to_string(),
                _ => {}
            }
        }
    }
    body.trim().to_string()
}

#[async_trait]
impl InstanceProvider for HttpProvider {
    async fn create_instance(&self, request: &inventory::CreateInstanceRequest) -> Result<String> {
        let url = self.url("/instances");
        info!(
            "🔵 [provider-http] POST {} offer_id={} disk_size={} label={}",
            url, request.offer_id, request.disk_size, request.label
        );

        let resp = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = error_message(resp).await;
            warn!(
                "❌ [provider-http] POST {} failed: status={}, message={}",
                url,
                status.as_u16(),
                message
            );
            return Err(anyhow::anyhow!(
                "create_instance failed: status={} message={}",
                status.as_u16(),
                message
            ));
        }

        let body: serde_json::Value = resp.json().await?;
        let instance_id = ["id", "instance_id"]
            .iter()
            .find_map(|key| body.get(*key).and_then(instance_id_from_value))
            .ok_or_else(|| anyhow::anyhow!("No instance id in create response: {}", body))?;

        info!(
            "✅ [provider-http] Instance created: id={} offer_id={}",
            instance_id, request.offer_id
        );
        Ok(instance_id)
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let url = self.url("/instances");
        let resp = self
            .client
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = error_message(resp).await;
            return Err(anyhow::anyhow!(
                "list_instances failed: status={} message={}",
                status.as_u16(),
                message
            ));
        }

        let body: ListInstancesResponse = resp
            .json()
            .await
            .context("invalid list_instances response")?;
        let instances = parse_instances(body.instances);
        debug!("[provider-http] GET {} -> {} instance(s)", url, instances.len());
        Ok(instances)
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<bool> {
        let url = self.url(&format!("/instances/{}", instance_id));
        info!("🔵 [provider-http] DELETE {}", url);

        let resp = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            warn!("⚠️ [provider-http] Instance {} already gone (404)", instance_id);
            return Ok(false);
        }
        if !status.is_success() {
            let message = error_message(resp).await;
            error!(
                "❌ [provider-http] DELETE {} failed: status={}, message={}",
                url,
                status.as_u16(),
                message
            );
            return Err(anyhow::anyhow!(
                "delete_instance failed: status={} message={}",
                status.as_u16(),
                message
            ));
        }

        info!("✅ [provider-http] DELETE {} succeeded", url);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_known_fields() {
        assert_eq!(extract_error_message(r#"{"detail":"Offer gone"}"#), "Offer gone");
        assert_eq!(
            extract_error_message(r#"{"success":false,"message":"no balance"}"#),
            "no balance"
        );
        assert_eq!(extract_error_message(r#"{"error":"bad"}"#), "bad");
        assert_eq!(extract_error_message("<html>502</html>"), "<html>502</html>");
    }

    #[test]
    fn bad_instance_rows_are_skipped() {
        let rows = vec![
            serde_json::json!({"id": 1, "actual_status": "running"}),
            serde_json::json!({"id": null, "actual_status": "running"}),
            serde_json::json!({"id": 2, "ssh_port": "not-a-port"}),
            serde_json::json!({"instance_id": "abc", "actual_status": "loading"}),
        ];
        let instances = parse_instances(rows);
        let ids: Vec<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["1", "abc"]);
    }

    #[test]
    fn base_url_is_normalized() {
        let p = HttpProvider::new(" http://localhost:9000/api/ ".into(), "t".into()).unwrap();
        assert_eq!(p.url("/instances"), "http://localhost:9000/api/instances");
    }
}
