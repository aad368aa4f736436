pub mod anthropic;
pub mod manager;
pub mod openai;

mod error;

pub use error::{Error, Result};
pub use manager::ProviderManager;

use std::{future::Future, pin::Pin, time::Duration};

use reqwest::{
	Response, StatusCode,
	header::{AUTHORIZATION, HeaderMap, HeaderName, RETRY_AFTER},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Capability {
	Complete,
	Chat,
	Embed,
	CountTokens,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	System,
	User,
	Assistant,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
	Text { text: String },
	ToolUse { id: String, name: String, input: Value },
	ToolResult { tool_use_id: String, content: String, is_error: bool },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatMessage {
	pub role: Role,
	pub content: Vec<ContentBlock>,
}
impl ChatMessage {
	pub fn text(role: Role, text: impl Into<String>) -> Self {
		Self { role, content: vec![ContentBlock::Text { text: text.into() }] }
	}

	/// Concatenated text blocks; tool blocks are skipped.
	pub fn plain_text(&self) -> String {
		let mut out = String::new();

		for block in &self.content {
			if let ContentBlock::Text { text } = block {
				out.push_str(text);
			}
		}

		out
	}
}

/// A tool definition in the LLM-facing JSON-Schema shape.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ToolSpec {
	pub name: String,
	pub description: String,
	pub input_schema: Value,
}

#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
	pub system: Option<String>,
	pub max_tokens: Option<u32>,
	pub temperature: Option<f32>,
	pub stop_sequences: Vec<String>,
	pub tools: Vec<ToolSpec>,
	/// Per-call deadline; overrides the provider's configured timeout.
	pub timeout: Option<Duration>,
}

#[derive(Clone, Debug, Default)]
pub struct CompleteOptions {
	pub max_tokens: Option<u32>,
	pub temperature: Option<f32>,
	pub stop_sequences: Vec<String>,
	pub timeout: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct TokenUsage {
	pub input_tokens: u32,
	pub output_tokens: u32,
}
impl TokenUsage {
	pub fn total(self) -> u32 {
		self.input_tokens.saturating_add(self.output_tokens)
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ToolCall {
	pub id: String,
	pub name: String,
	pub input: Value,
}

#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
	pub text: String,
	pub tool_calls: Vec<ToolCall>,
	pub usage: Option<TokenUsage>,
	pub stop_reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Completion {
	pub text: String,
	pub tokens_used: u32,
}

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn name(&self) -> &str;

	fn supports(&self, capability: Capability) -> bool;

	fn complete<'a>(
		&'a self,
		prompt: &'a str,
		opts: &'a CompleteOptions,
	) -> BoxFuture<'a, Result<Completion>> {
		let _ = (prompt, opts);

		Box::pin(async move {
			Err(Error::Unsupported { provider: self.name().to_string(), operation: "complete" })
		})
	}

	fn chat<'a>(
		&'a self,
		messages: &'a [ChatMessage],
		opts: &'a ChatOptions,
	) -> BoxFuture<'a, Result<ChatResponse>> {
		let _ = (messages, opts);

		Box::pin(async move {
			Err(Error::Unsupported { provider: self.name().to_string(), operation: "chat" })
		})
	}

	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
		Box::pin(async move {
			let texts = vec![text.to_string()];
			let vectors = self.embed_batch(&texts).await?;
			let Some(vector) = vectors.into_iter().next() else {
				return Err(Error::InvalidResponse {
					message: "Embedding provider returned no vectors.".to_string(),
				});
			};

			Ok(vector)
		})
	}

	fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		let _ = texts;

		Box::pin(async move {
			Err(Error::Unsupported { provider: self.name().to_string(), operation: "embed" })
		})
	}

	/// Providers without a native counter fall back to the chars/4 estimate.
	fn count_tokens(&self, text: &str) -> u32 {
		recall_domain::tokens::estimate(text)
	}
}

pub(crate) fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(
		AUTHORIZATION,
		format!("Bearer {api_key}").parse().map_err(|_| Error::InvalidConfig {
			message: "API key is not a valid header value.".to_string(),
		})?,
	);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: "Default header values must be strings.".to_string(),
			});
		};
		let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| Error::InvalidConfig {
			message: format!("Invalid default header name: {key}."),
		})?;

		headers.insert(
			name,
			raw.parse().map_err(|_| Error::InvalidConfig {
				message: format!("Invalid default header value for {key}."),
			})?,
		);
	}

	Ok(headers)
}

/// Normalizes HTTP failure statuses into the provider error taxonomy.
pub(crate) async fn check_status(response: Response) -> Result<Response> {
	let status = response.status();

	if status.is_success() {
		return Ok(response);
	}
	if status == StatusCode::TOO_MANY_REQUESTS {
		let retry_after = response
			.headers()
			.get(RETRY_AFTER)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.parse::<u64>().ok())
			.map(Duration::from_secs);

		return Err(Error::RateLimited { retry_after });
	}
	if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
		return Err(Error::Unauthenticated);
	}

	let body = response.text().await.unwrap_or_default();

	Err(Error::Upstream { message: format!("HTTP {status}: {body}") })
}
