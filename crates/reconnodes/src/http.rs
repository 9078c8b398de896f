use crate::kind::{definition, Builtin};
use async_trait::async_trait;
use reconcore::value::display;
use reconcore::{
    node_config, ConfigField, Node, NodeCategory, NodeContext, NodeDefinition, NodeError,
    NodeResult, PortDefinition, Value,
};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    #[default]
    Json,
    Raw,
    Form,
    None,
}

node_config! {
    pub struct HttpConfig {
        url: String = String::new() => ConfigField::string("URL")
            .describe("Request URL; {{placeholders}} resolve against the input and run variables"),
        method: String = "GET".to_string() => ConfigField::select("Method")
            .choices(&["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"]),
        headers: String = "{}".to_string() => ConfigField::text("Headers")
            .describe("JSON object of request headers"),
        body_type: BodyType = BodyType::Json => ConfigField::select("Body Type")
            .option("JSON", "json")
            .option("Raw Text", "raw")
            .option("Form Data", "form")
            .option("None", "none"),
        json_body: String = String::new() => ConfigField::text("JSON Body"),
        raw_body: String = String::new() => ConfigField::text("Raw Body"),
        form_data: String = "{}".to_string() => ConfigField::text("Form Data")
            .describe("JSON object of form fields"),
        timeout: u32 = 30 => ConfigField::number("Timeout (seconds)")
            .range(1.0, 300.0),
        follow_redirects: bool = true => ConfigField::boolean("Follow Redirects"),
        fail_on_error: bool = true => ConfigField::boolean("Fail on HTTP Error")
            .describe("Fail the node on non-2xx responses"),
    }
}

/// Generic HTTP call with templated URL, headers and body.
pub struct HttpRequestNode {
    config: HttpConfig,
}

fn json_object(field: &str, text: &str) -> Result<Map<String, Value>, NodeError> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(NodeError::Configuration(format!("{} must be a JSON object", field))),
        Err(e) => Err(NodeError::Configuration(format!("{} is not valid JSON: {}", field, e))),
    }
}

impl HttpRequestNode {
    fn client(&self) -> Result<Client, NodeError> {
        let policy = if self.config.follow_redirects {
            Policy::limited(10)
        } else {
            Policy::none()
        };
        Client::builder()
            .redirect(policy)
            .timeout(Duration::from_secs(self.config.timeout as u64))
            .build()
            .map_err(|e| NodeError::Configuration(format!("Failed to build HTTP client: {}", e)))
    }

    fn build(&self, ctx: &NodeContext, scope: &Map<String, Value>) -> Result<reqwest::RequestBuilder, NodeError> {
        let config = &self.config;
        let render = |text: &str| ctx.render(text, Some(scope));

        let url = render(&config.url);
        if url.trim().is_empty() {
            return Err(NodeError::Configuration("URL is required".into()));
        }
        let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
            .map_err(|_| NodeError::Configuration(format!("Unsupported method: {}", config.method)))?;
        let sends_body = [Method::POST, Method::PUT, Method::PATCH].contains(&method);

        ctx.events
            .info(format!("Making HTTP {} request to: {}", method, url));

        let mut request = self.client()?.request(method, url.trim());
        for (name, value) in json_object("headers", &config.headers)? {
            request = request.header(name.as_str(), render(&display(&value)));
        }

        if sends_body {
            request = match config.body_type {
                BodyType::Json if !config.json_body.trim().is_empty() => {
                    let body = render(&config.json_body);
                    match serde_json::from_str::<Value>(&body) {
                        Ok(value) => request.json(&value),
                        Err(_) => request
                            .header(reqwest::header::CONTENT_TYPE, "application/json")
                            .body(body),
                    }
                }
                BodyType::Raw if !config.raw_body.is_empty() => {
                    request.body(render(&config.raw_body))
                }
                BodyType::Form => {
                    let fields: Vec<(String, String)> = json_object("form_data", &config.form_data)?
                        .into_iter()
                        .map(|(key, value)| (key, render(&display(&value))))
                        .collect();
                    request.form(&fields)
                }
                _ => request,
            };
        }
        Ok(request)
    }
}

impl Builtin for HttpRequestNode {
    const TYPE: &'static str = "http";

    type Config = HttpConfig;

    fn with_config(config: HttpConfig) -> Self {
        Self { config }
    }

    fn describe() -> NodeDefinition {
        definition::<HttpConfig>(
            Self::TYPE,
            NodeCategory::Analysis,
            "HTTP Request",
            "Make HTTP requests to APIs and web services",
            "globe-2",
            vec![PortDefinition::new("input", "any")
                .describe("Data available to URL, header and body templates")],
            vec![PortDefinition::new("response", "object")
                .required()
                .describe("Status, headers and body of the response")],
        )
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        Self::TYPE
    }

    fn definition(&self) -> NodeDefinition {
        Self::describe()
    }

    async fn execute(&self, ctx: NodeContext) -> NodeResult {
        let scope = match ctx.merged_input() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let request = self.build(&ctx, &scope)?;

        let response = tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled.into()),
            sent = request.send() => sent.map_err(|e| {
                ctx.events.error(format!("HTTP request failed: {}", e));
                NodeError::ExecutionFailed(format!("HTTP request failed: {}", e))
            })?,
        };

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let final_url = response.url().to_string();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();
        let is_json = headers
            .get("content-type")
            .and_then(Value::as_str)
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        let text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        let data = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        if !status.is_success() && self.config.fail_on_error {
            let message = format!("HTTP request failed: {} {}", status.as_u16(), status_text);
            ctx.events.error(message.clone());
            return Err(NodeError::ExecutionFailed(message).into());
        }

        ctx.events.info(format!(
            "HTTP request completed with status: {}",
            status.as_u16()
        ));

        Ok(ctx.output(json!({
            "status": status.as_u16(),
            "statusText": status_text,
            "headers": headers,
            "data": data,
            "url": final_url,
            "ok": status.is_success(),
        })))
    }
}
