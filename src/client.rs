use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::decoder::DecodeError;
use crate::state::ConversationError;

/// Raw body chunks of a streamed reply, in arrival order.
pub type ReplyBody = Pin<Box<dyn Stream<Item = Result<Vec<u8>, SendError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Message is empty")]
    EmptyInput,
    #[error("A reply is already streaming")]
    Busy,
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },
    #[error("No response body received")]
    NoBody,
    #[error("{0}")]
    Transport(String),
    #[error("Request cancelled")]
    Cancelled,
}

impl SendError {
    /// Rejections leave the session untouched and are never shown to the user.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SendError::EmptyInput | SendError::Busy)
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            SendError::Transport(format!("Could not connect to the chat backend: {}", err))
        } else {
            SendError::Transport(err.to_string())
        }
    }
}

impl From<DecodeError> for SendError {
    fn from(err: DecodeError) -> Self {
        SendError::Transport(err.to_string())
    }
}

impl From<ConversationError> for SendError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::TailOpen => SendError::Busy,
            ConversationError::NoOpenReply => SendError::Transport(err.to_string()),
        }
    }
}

/// Something that can carry one user message to the backend and hand back
/// the reply body as a byte stream.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Issue the request. Status and body availability are checked here, so
    /// a returned body is always readable.
    async fn open(&self, message: &str) -> Result<ReplyBody, SendError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Clone)]
pub struct HttpChatClient {
    client: Client,
    endpoint: String,
}

impl HttpChatClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: config.endpoint().to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn health_url(&self) -> Result<Url, SendError> {
        let endpoint = Url::parse(&self.endpoint).map_err(|e| {
            SendError::Transport(format!("Invalid endpoint {}: {}", self.endpoint, e))
        })?;
        endpoint
            .join("/health")
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    /// Ask the backend whether it is up. Returns the status it reports.
    pub async fn health(&self) -> Result<String, SendError> {
        let url = self.health_url()?;
        tracing::debug!(%url, "Checking backend health");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(http_error(status));
        }

        let health: HealthResponse = response.json().await?;
        Ok(health.status)
    }
}

#[async_trait]
impl ChatTransport for HttpChatClient {
    async fn open(&self, message: &str) -> Result<ReplyBody, SendError> {
        tracing::info!(
            endpoint = %self.endpoint,
            chars = message.chars().count(),
            "Sending message"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&ChatRequest { message })
            .send()
            .await?;

        let status = response.status();
        tracing::info!(%status, "Response status");

        if !status.is_success() {
            return Err(http_error(status));
        }
        if status == StatusCode::NO_CONTENT {
            return Err(SendError::NoBody);
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(SendError::from));
        Ok(Box::pin(body))
    }
}

fn http_error(status: StatusCode) -> SendError {
    SendError::Http {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
    }
}
