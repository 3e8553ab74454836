use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::api::models::{Conversation, Message, Participant};
use crate::error::{Result, SyncError};
use crate::snapshot::SnapshotSource;

#[derive(Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    base: Url,
    token: String,
}

impl ApiClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(),
            base: Self::base_api(api_url)?,
            token: token.to_string(),
        })
    }

    fn base_api(api_url: &str) -> Result<Url> {
        let trimmed = api_url.trim_end_matches('/');
        let with_api = if trimmed.ends_with("/api") {
            format!("{}/", trimmed)
        } else {
            format!("{}/api/", trimmed)
        };
        Ok(Url::parse(&with_api)?)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let resp = self.with_auth(self.http.get(url)).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::Network(format!("HTTP {} for GET {}", resp.status(), path)));
        }
        Ok(resp.json::<T>().await?)
    }

    /// Conversation list for the signed-in user.
    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        // Some deployments wrap the list in {"conversations": [...]}.
        let json: Value = self.get_json("chat/conversations").await?;
        let items = match json {
            Value::Array(_) => json,
            other => other
                .get("conversations")
                .or_else(|| other.get("data"))
                .cloned()
                .unwrap_or(Value::Array(Vec::new())),
        };
        Ok(serde_json::from_value(items)?)
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!("chat/conversations/{}/messages", conversation_id))
            .await
    }

    pub async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("chat/conversations/{}/read", conversation_id))?;
        let resp = self
            .with_auth(self.http.put(url))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SyncError::Network(format!("HTTP {} marking {} read", resp.status(), conversation_id)));
        }
        Ok(())
    }

    pub async fn conversation_with(&self, user_id: &str) -> Result<Conversation> {
        self.get_json(&format!("chat/conversations/{}", user_id)).await
    }

    /// The user the token belongs to. Accepts `{"_id": ..}`, `{"id": ..}` or `{"user": {..}}`.
    pub async fn current_user(&self) -> Result<Participant> {
        let json: Value = self.get_json("auth/me").await?;
        let user = json.get("user").unwrap_or(&json);
        let id = user
            .get("_id")
            .or_else(|| user.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if id.is_empty() {
            return Err(SyncError::Network("No user id in auth/me response".into()));
        }
        let name = user.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Participant::new(id, name))
    }
}

impl SnapshotSource for ApiClient {
    async fn conversations(&self) -> Result<Vec<Conversation>> {
        ApiClient::conversations(self).await
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        ApiClient::messages(self, conversation_id).await
    }

    async fn mark_read(&self, conversation_id: &str) -> Result<()> {
        ApiClient::mark_read(self, conversation_id).await
    }

    async fn conversation_with(&self, user_id: &str) -> Result<Conversation> {
        ApiClient::conversation_with(self, user_id).await
    }

    async fn current_user(&self) -> Result<Participant> {
        ApiClient::current_user(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_api_appends_api_segment_once() {
        let a = ApiClient::new("http://localhost:5000", "t").unwrap();
        let b = ApiClient::new("http://localhost:5000/api/", "t").unwrap();
        assert_eq!(
            a.endpoint("chat/conversations").unwrap().as_str(),
            "http://localhost:5000/api/chat/conversations"
        );
        assert_eq!(
            b.endpoint("chat/conversations/c1/read").unwrap().as_str(),
            "http://localhost:5000/api/chat/conversations/c1/read"
        );
    }

    #[test]
    fn rejects_unparseable_base() {
        assert!(matches!(ApiClient::new("not a url", "t"), Err(SyncError::Url(_))));
    }
}
