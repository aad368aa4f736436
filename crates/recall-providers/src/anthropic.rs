use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};

use recall_config::LlmProviderConfig;

use crate::{
	BoxFuture, Capability, ChatMessage, ChatOptions, ChatResponse, CompleteOptions, Completion,
	ContentBlock, Error, LlmProvider, Result, Role, TokenUsage, ToolCall, check_status,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API. Chat and completion only; embeddings come from a
/// different back-end.
pub struct AnthropicProvider {
	name: String,
	cfg: LlmProviderConfig,
}
impl AnthropicProvider {
	pub fn new(name: String, cfg: LlmProviderConfig) -> Self {
		Self { name, cfg }
	}

	async fn chat_inner(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<ChatResponse> {
		let timeout = opts.timeout.unwrap_or(Duration::from_millis(self.cfg.timeout_ms));
		let client = Client::builder().timeout(timeout).build()?;
		let url = format!("{}/v1/messages", self.cfg.api_base.trim_end_matches('/'));
		let body = build_chat_body(&self.cfg.model, messages, opts);
		let mut request = client
			.post(url)
			.header("x-api-key", &self.cfg.api_key)
			.header("anthropic-version", ANTHROPIC_VERSION)
			.json(&body);

		for (key, value) in &self.cfg.default_headers {
			if let Some(raw) = value.as_str() {
				request = request.header(key.as_str(), raw);
			}
		}

		let response = check_status(request.send().await?).await?;
		let payload: Value = response.json().await?;

		parse_chat_response(&payload)
	}
}

impl LlmProvider for AnthropicProvider {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports(&self, capability: Capability) -> bool {
		matches!(capability, Capability::Chat | Capability::Complete | Capability::CountTokens)
	}

	fn complete<'a>(
		&'a self,
		prompt: &'a str,
		opts: &'a CompleteOptions,
	) -> BoxFuture<'a, Result<Completion>> {
		Box::pin(async move {
			let messages = [ChatMessage::text(Role::User, prompt)];
			let chat_opts = ChatOptions {
				max_tokens: opts.max_tokens,
				temperature: opts.temperature,
				stop_sequences: opts.stop_sequences.clone(),
				timeout: opts.timeout,
				..ChatOptions::default()
			};
			let response = self.chat_inner(&messages, &chat_opts).await?;
			let tokens_used = response.usage.map(TokenUsage::total).unwrap_or_default();

			Ok(Completion { text: response.text, tokens_used })
		})
	}

	fn chat<'a>(
		&'a self,
		messages: &'a [ChatMessage],
		opts: &'a ChatOptions,
	) -> BoxFuture<'a, Result<ChatResponse>> {
		Box::pin(self.chat_inner(messages, opts))
	}
}

/// Builds the messages-API request body. System turns are folded into the
/// top-level `system` field, which the API requires.
fn build_chat_body(model: &str, messages: &[ChatMessage], opts: &ChatOptions) -> Value {
	let mut system = opts.system.clone().unwrap_or_default();
	let mut wire_messages = Vec::new();

	for message in messages {
		if message.role == Role::System {
			if !system.is_empty() {
				system.push('\n');
			}

			system.push_str(&message.plain_text());

			continue;
		}

		let role = match message.role {
			Role::Assistant => "assistant",
			_ => "user",
		};
		let content: Vec<Value> = message.content.iter().map(content_block_to_wire).collect();

		wire_messages.push(json!({ "role": role, "content": content }));
	}

	let mut body = json!({
		"model": model,
		"max_tokens": opts.max_tokens.unwrap_or(1_024),
		"messages": wire_messages,
	});

	if !system.is_empty() {
		body["system"] = Value::String(system);
	}
	if let Some(temperature) = opts.temperature {
		body["temperature"] = json!(temperature);
	}
	if !opts.stop_sequences.is_empty() {
		body["stop_sequences"] = json!(opts.stop_sequences);
	}
	if !opts.tools.is_empty() {
		let tools: Vec<Value> = opts
			.tools
			.iter()
			.map(|tool| {
				json!({
					"name": tool.name,
					"description": tool.description,
					"input_schema": tool.input_schema,
				})
			})
			.collect();

		body["tools"] = Value::Array(tools);
	}

	body
}

fn content_block_to_wire(block: &ContentBlock) -> Value {
	match block {
		ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
		ContentBlock::ToolUse { id, name, input } =>
			json!({ "type": "tool_use", "id": id, "name": name, "input": input }),
		ContentBlock::ToolResult { tool_use_id, content, is_error } => json!({
			"type": "tool_result",
			"tool_use_id": tool_use_id,
			"content": content,
			"is_error": is_error,
		}),
	}
}

fn parse_chat_response(payload: &Value) -> Result<ChatResponse> {
	let content = payload.get("content").and_then(Value::as_array).ok_or_else(|| {
		Error::InvalidResponse { message: "Chat response is missing content array.".to_string() }
	})?;
	let mut text = String::new();
	let mut tool_calls = Vec::new();

	for block in content {
		match block.get("type").and_then(Value::as_str) {
			Some("text") => {
				text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default());
			},
			Some("tool_use") => {
				let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
				let name =
					block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
				let input = block.get("input").cloned().unwrap_or(Value::Null);

				tool_calls.push(ToolCall { id, name, input });
			},
			_ => {},
		}
	}

	let usage = payload.get("usage").map(|usage| TokenUsage {
		input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
		output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or_default()
			as u32,
	});
	let stop_reason =
		payload.get("stop_reason").and_then(Value::as_str).map(|reason| reason.to_string());

	Ok(ChatResponse { text, tool_calls, usage, stop_reason })
}
