//! HTTP client for the remote task-execution service.

use async_trait::async_trait;
use reconcore::backend::{TaskBackend, TaskStatus};
use reconcore::value::display;
use reconcore::{BackendError, Value};
use serde::Deserialize;
use serde_json::{json, Map};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";

/// Run variable holding the service address.
pub const API_BASE_URL_VAR: &str = "api_base_url";
/// Run variable holding the bearer token.
pub const AUTH_TOKEN_VAR: &str = "auth_token";

/// Talks to the task service: `POST /tasks`, `GET /tasks/{id}`,
/// `DELETE /tasks/{id}`.
pub struct HttpTaskBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    task_id: Value,
}

impl HttpTaskBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// Build from run variables, falling back to the local default address.
    pub fn from_variables(variables: &Map<String, Value>) -> Self {
        let base_url = variables
            .get(API_BASE_URL_VAR)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_API_BASE_URL);
        let backend = Self::new(base_url);
        match variables.get(AUTH_TOKEN_VAR).and_then(Value::as_str) {
            Some(token) => backend.with_token(token),
            None => backend,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn task_url(&self, task_id: &str) -> String {
        format!("{}/tasks/{}", self.base_url, task_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn status_text(response: &reqwest::Response) -> String {
    let status = response.status();
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
    .trim_end()
    .to_string()
}

#[async_trait]
impl TaskBackend for HttpTaskBackend {
    async fn submit(&self, command: &str) -> Result<String, BackendError> {
        let url = format!("{}/tasks", self.base_url);
        tracing::debug!("POST {}: {}", url, command);

        let response = self
            .authorize(self.client.post(&url))
            .json(&json!({ "command": command }))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Request(status_text(&response)));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        match display(&body.task_id) {
            id if id.is_empty() => Err(BackendError::InvalidResponse(
                "response carries no task_id".to_string(),
            )),
            id => Ok(id),
        }
    }

    async fn status(&self, task_id: &str) -> Result<TaskStatus, BackendError> {
        let response = self
            .authorize(self.client.get(self.task_url(task_id)))
            .send()
            .await
            .map_err(|e| BackendError::Status(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Status(status_text(&response)));
        }

        response
            .json::<TaskStatus>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn cancel(&self, task_id: &str) -> Result<(), BackendError> {
        tracing::debug!("DELETE {}", self.task_url(task_id));
        let response = self
            .authorize(self.client.delete(self.task_url(task_id)))
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Request(status_text(&response)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_variables() {
        let backend = HttpTaskBackend::from_variables(&Map::new());
        assert_eq!(backend.base_url(), DEFAULT_API_BASE_URL);
        assert!(backend.token.is_none());

        let mut vars = Map::new();
        vars.insert(API_BASE_URL_VAR.into(), json!("https://tasks.internal:8443/"));
        vars.insert(AUTH_TOKEN_VAR.into(), json!("secret"));
        let backend = HttpTaskBackend::from_variables(&vars);
        assert_eq!(backend.base_url(), "https://tasks.internal:8443");
        assert_eq!(backend.task_url("42"), "https://tasks.internal:8443/tasks/42");
        assert_eq!(backend.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_empty_token_ignored() {
        let backend = HttpTaskBackend::new(DEFAULT_API_BASE_URL).with_token("");
        assert!(backend.token.is_none());
    }
}
