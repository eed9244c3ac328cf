use super::{ChatRequest, ChatResponse, LlmError};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl OpenAiConfig {
    /// POST `body` to `{base_url}/{endpoint}`, attaching the bearer token if one is set.
    pub(crate) fn post<T: Serialize>(&self, client: &Client, endpoint: &str, body: &T) -> RequestBuilder {
        let mut req = client
            .post(format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint))
            .header("Content-Type", "application/json")
            .json(body);

        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        req
    }
}

/// Turn a non-2xx response into `LlmError::Api`.
pub(crate) async fn check_status(resp: Response) -> Result<Response, LlmError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    Err(LlmError::Api { status, message })
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

pub async fn chat(config: &OpenAiConfig, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
    let client = Client::new();
    let messages: Vec<OpenAiMessage> = request
        .messages
        .iter()
        .map(|m| OpenAiMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect();

    let body = OpenAiRequest {
        model: request.model.clone(),
        messages,
        stream: false,
    };

    let resp = config.post(&client, "chat/completions", &body).send().await?;
    let data: OpenAiResponse = check_status(resp).await?.json().await?;
    let content = data
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| LlmError::Parse("response contained no choices".into()))?;

    Ok(ChatResponse { content })
}
