use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use serde_json::json;
use time::OffsetDateTime;

use recall_providers::{
	BoxFuture, ChatMessage, ChatOptions, ContentBlock, LlmProvider, Role,
};
use recall_service::context::ConversationMessage;

use crate::{
	Result,
	step::AgentStep,
	tool::{ToolContext, ToolRegistry},
};

pub const ITERATION_LIMIT_MESSAGE: &str = "unable to complete request within iteration limit";

const SYSTEM_PROMPT: &str = "\
You are the collective memory assistant for an engineering team. You answer \
questions by consulting the team's stored knowledge: chat discussions, issue \
updates, and code changes. Use the available tools to look up relevant \
knowledge before answering, cite what you found, and say so plainly when the \
stored knowledge does not contain an answer.";

/// Supplies pre-retrieved knowledge for the system prompt. Failures inside an
/// implementation must degrade to `None`; the agent can still reach memory
/// through its tools.
pub trait ContextSource
where
	Self: Send + Sync,
{
	fn knowledge_context<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Option<String>>;
}

#[derive(Clone, Debug)]
pub struct AgentOptions {
	pub max_iterations: u32,
	pub temperature: f32,
	pub max_tokens: u32,
	pub include_memory_context: bool,
	/// Overall deadline for the run, propagated to every LLM call.
	pub timeout: Option<Duration>,
}
impl AgentOptions {
	pub fn from_config(cfg: &recall_config::Agent) -> Self {
		Self {
			max_iterations: cfg.max_iterations,
			temperature: cfg.temperature,
			max_tokens: cfg.max_tokens,
			include_memory_context: true,
			timeout: None,
		}
	}
}

#[derive(Clone, Debug)]
pub struct AgentOutcome {
	pub response: String,
	pub steps: Vec<AgentStep>,
	pub tools_used: Vec<String>,
	pub iterations: u32,
	pub success: bool,
}

pub struct Agent {
	provider: Arc<dyn LlmProvider>,
	registry: ToolRegistry,
	context: Option<Arc<dyn ContextSource>>,
}
impl Agent {
	pub fn new(provider: Arc<dyn LlmProvider>, registry: ToolRegistry) -> Self {
		Self { provider, registry, context: None }
	}

	pub fn with_context(mut self, context: Arc<dyn ContextSource>) -> Self {
		self.context = Some(context);

		self
	}

	pub fn registry(&self) -> &ToolRegistry {
		&self.registry
	}

	/// The tool-use loop: chat until the model answers without tools or the
	/// iteration cap is hit. Every tool_use is answered with exactly one
	/// tool_result before the next LLM call; handler failures come back as
	/// structured error payloads so the model can recover.
	pub async fn run(
		&self,
		query: &str,
		history: &[ConversationMessage],
		opts: &AgentOptions,
		ctx: &ToolContext,
	) -> Result<AgentOutcome> {
		let started = Instant::now();
		let mut steps: Vec<AgentStep> = Vec::new();
		let mut tools_used: Vec<String> = Vec::new();
		let mut system = SYSTEM_PROMPT.to_string();

		if opts.include_memory_context
			&& let Some(source) = self.context.as_ref()
			&& let Some(knowledge) = source.knowledge_context(query).await
			&& !knowledge.is_empty()
		{
			system.push_str("\n\nRelevant team knowledge:\n");
			system.push_str(&knowledge);
		}

		let mut messages: Vec<ChatMessage> = history
			.iter()
			.map(|message| ChatMessage::text(message.role, message.content.clone()))
			.collect();

		messages.push(ChatMessage::text(Role::User, query));

		let mut last_text = String::new();

		for iteration in 1..=opts.max_iterations {
			let call_timeout = match remaining_timeout(opts.timeout, started) {
				Deadline::Exhausted => {
					return Ok(partial_outcome(last_text, steps, tools_used, iteration - 1));
				},
				Deadline::Unbounded => None,
				Deadline::Remaining(remaining) => Some(remaining),
			};
			let chat_opts = ChatOptions {
				system: Some(system.clone()),
				max_tokens: Some(opts.max_tokens),
				temperature: Some(opts.temperature),
				tools: self.registry.specs(),
				timeout: call_timeout,
				..ChatOptions::default()
			};
			let response = match self.provider.chat(&messages, &chat_opts).await {
				Ok(response) => response,
				Err(recall_providers::Error::Timeout) if opts.timeout.is_some() => {
					return Ok(partial_outcome(last_text, steps, tools_used, iteration - 1));
				},
				Err(err) => return Err(err.into()),
			};

			if response.tool_calls.is_empty() {
				steps.push(AgentStep::Message {
					role: "assistant".to_string(),
					text: response.text.clone(),
					timestamp: OffsetDateTime::now_utc(),
				});

				return Ok(AgentOutcome {
					response: response.text,
					steps,
					tools_used,
					iterations: iteration,
					success: true,
				});
			}

			if !response.text.trim().is_empty() {
				steps.push(AgentStep::Thinking {
					text: response.text.clone(),
					timestamp: OffsetDateTime::now_utc(),
				});

				last_text = response.text.clone();
			}

			let mut assistant_content = Vec::new();

			if !response.text.is_empty() {
				assistant_content.push(ContentBlock::Text { text: response.text.clone() });
			}

			for call in &response.tool_calls {
				assistant_content.push(ContentBlock::ToolUse {
					id: call.id.clone(),
					name: call.name.clone(),
					input: call.input.clone(),
				});
			}

			messages.push(ChatMessage { role: Role::Assistant, content: assistant_content });

			for call in response.tool_calls {
				let (result, is_error) =
					match self.registry.execute(&call.name, &call.input, ctx).await {
						Ok(value) => (value, false),
						Err(err) => (json!({ "success": false, "error": err.to_string() }), true),
					};

				if !tools_used.contains(&call.name) {
					tools_used.push(call.name.clone());
				}

				steps.push(AgentStep::ToolUse {
					tool: call.name.clone(),
					input: call.input.clone(),
					result: result.clone(),
					timestamp: OffsetDateTime::now_utc(),
				});
				messages.push(ChatMessage {
					role: Role::User,
					content: vec![ContentBlock::ToolResult {
						tool_use_id: call.id,
						content: result.to_string(),
						is_error,
					}],
				});
			}
		}

		steps.push(AgentStep::Message {
			role: "assistant".to_string(),
			text: ITERATION_LIMIT_MESSAGE.to_string(),
			timestamp: OffsetDateTime::now_utc(),
		});

		Ok(AgentOutcome {
			response: ITERATION_LIMIT_MESSAGE.to_string(),
			steps,
			tools_used,
			iterations: opts.max_iterations,
			success: false,
		})
	}
}

enum Deadline {
	Unbounded,
	Remaining(Duration),
	Exhausted,
}

fn remaining_timeout(timeout: Option<Duration>, started: Instant) -> Deadline {
	let Some(timeout) = timeout else {
		return Deadline::Unbounded;
	};
	let elapsed = started.elapsed();

	if elapsed >= timeout {
		return Deadline::Exhausted;
	}

	Deadline::Remaining(timeout - elapsed)
}

fn partial_outcome(
	last_text: String,
	steps: Vec<AgentStep>,
	tools_used: Vec<String>,
	iterations: u32,
) -> AgentOutcome {
	AgentOutcome { response: last_text, steps, tools_used, iterations, success: false }
}
