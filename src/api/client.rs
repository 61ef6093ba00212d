use crate::api::Backend;
use crate::api::events::{CONVERSATIONS_TABLE, MESSAGES_TABLE};
use crate::api::models::{
    Conversation, CreateUploadUrlRequest, Instance, Message, SendMessageRequest, SendReceipt,
    UploadTarget,
};
use crate::config::Config;
use crate::error::{ApiError, ConfigError};
use async_trait::async_trait;
use log::debug;
use reqwest::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

const FN_CREATE_UPLOAD_URL: &str = "whatsapp-create-upload-url";
const FN_SEND_MESSAGE: &str = "whatsapp-send-message";
const TABLE_INSTANCES: &str = "whatsapp_instances";

/// HTTP client for the CRM backend: remote functions under `/functions/v1`
/// and table queries under `/rest/v1`.
#[derive(Clone)]
pub struct ApiClient {
    http: HttpClient,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let base_url = config.base_url()?;
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            access_token: config.access_token.clone(),
        })
    }

    /// Client with default transport settings, mostly for tests and tools.
    pub fn with_base(base_url: Url, api_key: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url,
            api_key: api_key.into(),
            access_token,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn function_url(&self, name: &str) -> String {
        self.endpoint(&format!("functions/v1/{name}"))
    }

    fn rest_url(&self, table: &str) -> String {
        self.endpoint(&format!("rest/v1/{table}"))
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        req.header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
    }

    async fn call_function<T: DeserializeOwned>(&self, name: &str, body: &impl serde::Serialize) -> Result<T, ApiError> {
        let endpoint = self.function_url(name);
        debug!("POST {endpoint}");
        let resp = self.with_auth(self.http.post(&endpoint)).json(body).send().await?;
        let json = function_result(resp).await?;
        serde_json::from_value(json).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>, ApiError> {
        let endpoint = self.rest_url(table);
        debug!("GET {endpoint} {query:?}");
        let resp = self.with_auth(self.http.get(&endpoint)).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: error_from_body(&text),
            });
        }
        Ok(resp.json::<Vec<T>>().await?)
    }
}

/// Reads a remote function response and folds its many failure shapes into
/// one error: non-2xx, a top-level `error`, or `success: false`.
async fn function_result(resp: reqwest::Response) -> Result<Value, ApiError> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_from_body(&text),
        });
    }
    let json: Value = serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))?;
    normalize(json)
}

pub(crate) fn normalize(json: Value) -> Result<Value, ApiError> {
    if let Some(err) = json.get("error").filter(|v| !v.is_null()) {
        return Err(ApiError::Rejected { message: error_text(err) });
    }
    if json.get("success").and_then(Value::as_bool) == Some(false) {
        let message = json.get("message").and_then(error_text);
        return Err(ApiError::Rejected { message });
    }
    Ok(json)
}

fn error_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(error_text),
        _ => None,
    }
}

fn error_from_body(text: &str) -> Option<String> {
    match serde_json::from_str::<Value>(text) {
        Ok(json) => json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(error_text),
        Err(_) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn create_upload_url(&self, req: &CreateUploadUrlRequest) -> Result<UploadTarget, ApiError> {
        self.call_function(FN_CREATE_UPLOAD_URL, req).await
    }

    async fn upload(&self, target: &UploadTarget, mime_type: &str, bytes: Vec<u8>) -> Result<(), ApiError> {
        // storage hands out either absolute URLs or paths relative to the project
        let url = if target.signed_url.starts_with("http://") || target.signed_url.starts_with("https://") {
            target.signed_url.clone()
        } else {
            self.endpoint(&target.signed_url)
        };
        debug!("PUT {} ({} bytes, {mime_type})", target.path, bytes.len());
        let resp = self.http.put(&url).header(CONTENT_TYPE, mime_type).body(bytes).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status { status: status.as_u16(), message: None });
        }
        Ok(())
    }

    async fn send_message(&self, req: &SendMessageRequest) -> Result<SendReceipt, ApiError> {
        self.call_function(FN_SEND_MESSAGE, req).await
    }

    async fn list_conversations(&self, organization_id: &str, instance_id: Option<&str>) -> Result<Vec<Conversation>, ApiError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("organization_id", format!("eq.{organization_id}")),
            ("order", "last_message_at.desc.nullslast".to_string()),
        ];
        if let Some(instance) = instance_id {
            query.push(("instance_id", format!("eq.{instance}")));
        }
        self.select(CONVERSATIONS_TABLE, &query).await
    }

    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, ApiError> {
        let query = [
            ("select", "*".to_string()),
            ("conversation_id", format!("eq.{conversation_id}")),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        let mut rows: Vec<Message> = self.select(MESSAGES_TABLE, &query).await?;
        rows.reverse();
        Ok(rows)
    }

    async fn list_instances(&self, organization_id: &str) -> Result<Vec<Instance>, ApiError> {
        let query = [
            ("select", "*".to_string()),
            ("organization_id", format!("eq.{organization_id}")),
        ];
        self.select(TABLE_INSTANCES, &query).await
    }

    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<(), ApiError> {
        let endpoint = self.rest_url(CONVERSATIONS_TABLE);
        let resp = self
            .with_auth(self.http.patch(&endpoint))
            .query(&[("id", format!("eq.{conversation_id}"))])
            .json(&serde_json::json!({ "unread_count": 0 }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), message: error_from_body(&text) });
        }
        Ok(())
    }
}
