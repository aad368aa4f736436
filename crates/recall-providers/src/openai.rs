use std::time::Duration;

use reqwest::Client;
use serde_json::{Value, json};

use recall_config::{Embedding, LlmProviderConfig};

use crate::{
	BoxFuture, Capability, ChatMessage, ChatOptions, ChatResponse, CompleteOptions, Completion,
	ContentBlock, Error, LlmProvider, Result, Role, TokenUsage, ToolCall, auth_headers,
	check_status,
};

/// OpenAI-compatible back-end: chat completions plus the embeddings endpoint.
/// Either half may be absent; missing operations fail fast with `Unsupported`.
pub struct OpenAiProvider {
	name: String,
	chat_cfg: Option<LlmProviderConfig>,
	embed_cfg: Option<Embedding>,
}
impl OpenAiProvider {
	pub fn new(
		name: String,
		chat_cfg: Option<LlmProviderConfig>,
		embed_cfg: Option<Embedding>,
	) -> Self {
		Self { name, chat_cfg, embed_cfg }
	}

	async fn chat_inner(&self, messages: &[ChatMessage], opts: &ChatOptions) -> Result<ChatResponse> {
		let Some(cfg) = self.chat_cfg.as_ref() else {
			return Err(Error::Unsupported { provider: self.name.clone(), operation: "chat" });
		};
		let timeout = opts.timeout.unwrap_or(Duration::from_millis(cfg.timeout_ms));
		let client = Client::builder().timeout(timeout).build()?;
		let url = format!("{}/chat/completions", cfg.api_base.trim_end_matches('/'));
		let body = build_chat_body(&cfg.model, messages, opts);
		let response = client
			.post(url)
			.headers(auth_headers(&cfg.api_key, &cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let payload: Value = check_status(response).await?.json().await?;

		parse_chat_response(&payload)
	}

	async fn embed_inner(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let Some(cfg) = self.embed_cfg.as_ref() else {
			return Err(Error::Unsupported { provider: self.name.clone(), operation: "embed" });
		};

		if texts.is_empty() {
			return Ok(Vec::new());
		}

		let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
		let url = format!("{}/embeddings", cfg.api_base.trim_end_matches('/'));
		let mut out = Vec::with_capacity(texts.len());

		// Batched for throughput; the provider caps request sizes anyway.
		for batch in texts.chunks(cfg.batch_size.max(1) as usize) {
			let body = json!({
				"model": cfg.model,
				"input": batch,
				"dimensions": cfg.dimensions,
			});
			let response = client
				.post(&url)
				.headers(auth_headers(&cfg.api_key, &cfg.default_headers)?)
				.json(&body)
				.send()
				.await?;
			let payload: Value = check_status(response).await?.json().await?;

			out.extend(parse_embedding_response(&payload)?);
		}

		Ok(out)
	}
}

impl LlmProvider for OpenAiProvider {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports(&self, capability: Capability) -> bool {
		match capability {
			Capability::Chat | Capability::Complete => self.chat_cfg.is_some(),
			Capability::Embed => self.embed_cfg.is_some(),
			Capability::CountTokens => true,
		}
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

	fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(self.embed_inner(texts))
	}
}

fn build_chat_body(model: &str, messages: &[ChatMessage], opts: &ChatOptions) -> Value {
	let mut wire_messages = Vec::new();

	if let Some(system) = opts.system.as_ref().filter(|system| !system.is_empty()) {
		wire_messages.push(json!({ "role": "system", "content": system }));
	}

	for message in messages {
		append_wire_messages(&mut wire_messages, message);
	}

	let mut body = json!({ "model": model, "messages": wire_messages });

	if let Some(max_tokens) = opts.max_tokens {
		body["max_tokens"] = json!(max_tokens);
	}
	if let Some(temperature) = opts.temperature {
		body["temperature"] = json!(temperature);
	}
	if !opts.stop_sequences.is_empty() {
		body["stop"] = json!(opts.stop_sequences);
	}
	if !opts.tools.is_empty() {
		let tools: Vec<Value> = opts
			.tools
			.iter()
			.map(|tool| {
				json!({
					"type": "function",
					"function": {
						"name": tool.name,
						"description": tool.description,
						"parameters": tool.input_schema,
					},
				})
			})
			.collect();

		body["tools"] = Value::Array(tools);
	}

	body
}

/// One `ChatMessage` can fan out to several wire messages: tool results are
/// standalone `role = tool` turns in this dialect.
fn append_wire_messages(out: &mut Vec<Value>, message: &ChatMessage) {
	let role = match message.role {
		Role::System => "system",
		Role::User => "user",
		Role::Assistant => "assistant",
	};
	let mut text = String::new();
	let mut tool_calls = Vec::new();

	for block in &message.content {
		match block {
			ContentBlock::Text { text: block_text } => text.push_str(block_text),
			ContentBlock::ToolUse { id, name, input } => {
				tool_calls.push(json!({
					"id": id,
					"type": "function",
					"function": { "name": name, "arguments": input.to_string() },
				}));
			},
			ContentBlock::ToolResult { tool_use_id, content, .. } => {
				out.push(json!({
					"role": "tool",
					"tool_call_id": tool_use_id,
					"content": content,
				}));
			},
		}
	}

	if text.is_empty() && tool_calls.is_empty() {
		return;
	}

	let mut wire = json!({ "role": role });

	wire["content"] = if text.is_empty() { Value::Null } else { Value::String(text) };

	if !tool_calls.is_empty() {
		wire["tool_calls"] = Value::Array(tool_calls);
	}

	out.push(wire);
}

fn parse_chat_response(payload: &Value) -> Result<ChatResponse> {
	let message = payload
		.get("choices")
		.and_then(Value::as_array)
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("message"))
		.ok_or_else(|| Error::InvalidResponse {
			message: "Chat response is missing choices.".to_string(),
		})?;
	let text =
		message.get("content").and_then(Value::as_str).unwrap_or_default().to_string();
	let mut tool_calls = Vec::new();

	if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
		for call in calls {
			let id = call.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
			let function = call.get("function");
			let name = function
				.and_then(|f| f.get("name"))
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			let arguments =
				function.and_then(|f| f.get("arguments")).and_then(Value::as_str).unwrap_or("{}");
			let input = serde_json::from_str(arguments)
				.unwrap_or_else(|_| Value::String(arguments.to_string()));

			tool_calls.push(ToolCall { id, name, input });
		}
	}

	let usage = payload.get("usage").map(|usage| TokenUsage {
		input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or_default()
			as u32,
		output_tokens: usage
			.get("completion_tokens")
			.and_then(Value::as_u64)
			.unwrap_or_default() as u32,
	});
	let stop_reason = payload
		.get("choices")
		.and_then(Value::as_array)
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("finish_reason"))
		.and_then(Value::as_str)
		.map(|reason| reason.to_string());

	Ok(ChatResponse { text, tool_calls, usage, stop_reason })
}

/// Embeddings arrive with an `index` per item; re-order defensively before
/// zipping them back to the inputs.
fn parse_embedding_response(payload: &Value) -> Result<Vec<Vec<f32>>> {
	let data = payload.get("data").and_then(Value::as_array).ok_or_else(|| {
		Error::InvalidResponse { message: "Embedding response is missing data array.".to_string() }
	})?;
	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(Value::as_u64)
			.map(|index| index as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").and_then(Value::as_array).ok_or_else(|| {
			Error::InvalidResponse { message: "Embedding item missing embedding array.".to_string() }
		})?;
		let mut vector = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding value must be numeric.".to_string(),
			})?;

			vector.push(number as f32);
		}

		indexed.push((index, vector));
	}

	indexed.sort_by_key(|(index, _)| *index);

	Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
