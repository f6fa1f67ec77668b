//! Ollama Generate Component
//!
//! Sends a prompt to an Ollama server and returns the response. The HTTP
//! request is raced against the attempt's cancellation token, so cancelling
//! the node drops the in-flight request.

use async_node::{
    AsyncComponent, CancellationToken, DataAccess, NodeError, ProgressReporter, Result, Worker,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// Response structure from Ollama API
#[derive(Debug, Clone, Deserialize)]
struct OllamaResponse {
    model: String,
    response: String,
    #[serde(default)]
    done: bool,
}

/// Component creating one [`OllamaGenerateWorker`] per attempt
///
/// # Inputs
/// - `prompt` - The prompt to send (required)
/// - `model` - The model name to use (required)
/// - `system_prompt` (optional) - System prompt
/// - `temperature` (optional) - Sampling temperature
/// - `max_tokens` (optional) - Maximum tokens to generate
///
/// # Outputs
/// - `response` - The model's response text
/// - `model_used` - The model that answered
pub struct OllamaGenerateComponent {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaGenerateComponent {
    /// Port ID for prompt input
    pub const PORT_PROMPT: &'static str = "prompt";
    /// Port ID for model input
    pub const PORT_MODEL: &'static str = "model";
    /// Port ID for system prompt input
    pub const PORT_SYSTEM_PROMPT: &'static str = "system_prompt";
    /// Port ID for temperature input
    pub const PORT_TEMPERATURE: &'static str = "temperature";
    /// Port ID for max tokens input
    pub const PORT_MAX_TOKENS: &'static str = "max_tokens";
    /// Port ID for response output
    pub const PORT_RESPONSE: &'static str = "response";
    /// Port ID for model output (echo back which model was used)
    pub const PORT_MODEL_OUT: &'static str = "model_used";

    /// Create a component talking to the default local server
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_base_url(name, "http://localhost:11434")
    }

    /// Create with a custom base URL
    pub fn with_base_url(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl AsyncComponent for OllamaGenerateComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_worker(&self) -> Box<dyn Worker> {
        Box::new(OllamaGenerateWorker::new(
            self.client.clone(),
            self.base_url.clone(),
        ))
    }
}

/// One prompt completion
pub struct OllamaGenerateWorker {
    client: reqwest::Client,
    base_url: String,
    request_body: Option<Value>,
    response: Option<OllamaResponse>,
}

impl OllamaGenerateWorker {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            request_body: None,
            response: None,
        }
    }

    /// The request body built from the gathered inputs
    pub fn request_body(&self) -> Option<&Value> {
        self.request_body.as_ref()
    }
}

#[async_trait]
impl Worker for OllamaGenerateWorker {
    fn gather_input(&mut self, ctx: &dyn DataAccess) -> Result<()> {
        let prompt = ctx.str_input(OllamaGenerateComponent::PORT_PROMPT)?;
        let model = ctx.str_input(OllamaGenerateComponent::PORT_MODEL)?;
        let system_prompt = ctx.optional_str(OllamaGenerateComponent::PORT_SYSTEM_PROMPT)?;
        let temperature = ctx.optional_f64(OllamaGenerateComponent::PORT_TEMPERATURE)?;
        let max_tokens = ctx.optional_i64(OllamaGenerateComponent::PORT_MAX_TOKENS)?;

        let mut request_body = json!({
            "model": model,
            "prompt": prompt,
            "stream": false
        });

        if let Some(sys) = &system_prompt {
            request_body["system"] = json!(sys);
        }

        let mut options = serde_json::Map::new();
        if let Some(temp) = temperature {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max) = max_tokens {
            options.insert("num_predict".to_string(), json!(max));
        }
        if !options.is_empty() {
            request_body["options"] = Value::Object(options);
        }

        self.request_body = Some(request_body);
        Ok(())
    }

    async fn do_work(&mut self, token: CancellationToken, progress: ProgressReporter) -> Result<()> {
        let request_body = self
            .request_body
            .clone()
            .ok_or_else(|| NodeError::failed("No request gathered"))?;
        let url = format!("{}/api/generate", self.base_url);
        progress.report(0, 1);

        log::debug!(
            "OllamaGenerateWorker: sending request to {} with model '{}'",
            url,
            request_body["model"]
        );

        let request = generate(self.client.clone(), url, request_body);
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(NodeError::Cancelled),
            response = request => response?,
        };

        if !response.done {
            log::warn!("OllamaGenerateWorker: server returned an unfinished response");
        }
        log::debug!(
            "OllamaGenerateWorker: completed with {} chars response using model '{}'",
            response.response.len(),
            response.model
        );

        self.response = Some(response);
        progress.report(1, 1);
        Ok(())
    }

    fn set_output(&mut self, ctx: &mut dyn DataAccess) -> Result<Option<String>> {
        let response = self
            .response
            .take()
            .ok_or_else(|| NodeError::failed("No response to deliver"))?;

        let summary = format!("{} chars from {}", response.response.len(), response.model);
        ctx.set_output(OllamaGenerateComponent::PORT_RESPONSE, json!(response.response));
        ctx.set_output(OllamaGenerateComponent::PORT_MODEL_OUT, json!(response.model));
        Ok(Some(summary))
    }
}

async fn generate(client: reqwest::Client, url: String, body: Value) -> Result<OllamaResponse> {
    let http_response = client.post(&url).json(&body).send().await.map_err(|e| {
        NodeError::http(format!(
            "Failed to connect to Ollama server at {}: {}. Is Ollama running?",
            url, e
        ))
    })?;

    if !http_response.status().is_success() {
        let status = http_response.status();
        let error_body = http_response.text().await.unwrap_or_default();
        return Err(NodeError::http(format!(
            "Ollama API error ({}): {}",
            status, error_body
        )));
    }

    http_response
        .json::<OllamaResponse>()
        .await
        .map_err(|e| NodeError::http(format!("Failed to parse Ollama response: {}", e)))
}
