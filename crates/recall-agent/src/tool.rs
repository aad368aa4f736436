use std::{collections::BTreeMap, sync::Arc};

use serde_json::{Map, Value, json};

use recall_providers::{BoxFuture, ToolSpec};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParamKind {
	String,
	Number,
	Boolean,
	Object,
	Array,
}
impl ParamKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::String => "string",
			Self::Number => "number",
			Self::Boolean => "boolean",
			Self::Object => "object",
			Self::Array => "array",
		}
	}

	pub fn matches(self, value: &Value) -> bool {
		match self {
			Self::String => value.is_string(),
			Self::Number => value.is_number(),
			Self::Boolean => value.is_boolean(),
			Self::Object => value.is_object(),
			Self::Array => value.is_array(),
		}
	}
}

#[derive(Clone, Debug)]
pub struct ToolParameter {
	pub name: String,
	pub kind: ParamKind,
	pub description: String,
	pub required: bool,
	/// Overrides the kind-derived JSON schema when present.
	pub schema: Option<Value>,
}
impl ToolParameter {
	pub fn new(name: &str, kind: ParamKind, description: &str, required: bool) -> Self {
		Self {
			name: name.to_string(),
			kind,
			description: description.to_string(),
			required,
			schema: None,
		}
	}
}

/// Execution context threaded into every handler call.
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
	pub user_id: Option<String>,
}

pub trait ToolHandler
where
	Self: Send + Sync,
{
	fn call(&self, input: Value, ctx: ToolContext) -> BoxFuture<'static, Result<Value, String>>;
}

/// Adapter so tests and small tools can be written as closures.
pub struct FnHandler<F>(pub F);
impl<F> ToolHandler for FnHandler<F>
where
	F: Fn(Value, ToolContext) -> BoxFuture<'static, Result<Value, String>> + Send + Sync,
{
	fn call(&self, input: Value, ctx: ToolContext) -> BoxFuture<'static, Result<Value, String>> {
		(self.0)(input, ctx)
	}
}

#[derive(Clone)]
pub struct Tool {
	pub name: String,
	pub description: String,
	pub parameters: Vec<ToolParameter>,
	pub category: Option<String>,
	pub handler: Arc<dyn ToolHandler>,
}
impl Tool {
	/// The LLM-facing definition, derived from the declared parameters.
	pub fn spec(&self) -> ToolSpec {
		let mut properties = Map::new();
		let mut required = Vec::new();

		for parameter in &self.parameters {
			let schema = parameter.schema.clone().unwrap_or_else(|| {
				json!({ "type": parameter.kind.as_str(), "description": parameter.description })
			});

			properties.insert(parameter.name.clone(), schema);

			if parameter.required {
				required.push(Value::String(parameter.name.clone()));
			}
		}

		ToolSpec {
			name: self.name.clone(),
			description: self.description.clone(),
			input_schema: json!({
				"type": "object",
				"properties": properties,
				"required": required,
			}),
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
	#[error("Unknown tool: {0}")]
	UnknownTool(String),
	#[error("Validation failed: {message}")]
	Validation { message: String },
	#[error("{message}")]
	Handler { message: String },
}

/// Name-keyed tool catalog. Iteration order is stable so exported tool lists
/// do not shuffle between calls.
#[derive(Clone, Default)]
pub struct ToolRegistry {
	tools: BTreeMap<String, Tool>,
}
impl ToolRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, tool: Tool) {
		self.tools.insert(tool.name.clone(), tool);
	}

	pub fn unregister(&mut self, name: &str) -> bool {
		self.tools.remove(name).is_some()
	}

	pub fn get(&self, name: &str) -> Option<&Tool> {
		self.tools.get(name)
	}

	pub fn list(&self) -> Vec<&Tool> {
		self.tools.values().collect()
	}

	pub fn specs(&self) -> Vec<ToolSpec> {
		self.tools.values().map(Tool::spec).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.tools.is_empty()
	}

	/// Validates the input against the declared parameters, then runs the
	/// handler. Unknown tools and malformed inputs never reach a handler.
	pub async fn execute(
		&self,
		name: &str,
		input: &Value,
		ctx: &ToolContext,
	) -> Result<Value, ExecuteError> {
		let Some(tool) = self.tools.get(name) else {
			return Err(ExecuteError::UnknownTool(name.to_string()));
		};

		validate_input(tool, input)?;

		tool.handler
			.call(input.clone(), ctx.clone())
			.await
			.map_err(|message| ExecuteError::Handler { message })
	}
}

fn validate_input(tool: &Tool, input: &Value) -> Result<(), ExecuteError> {
	let Some(fields) = input.as_object() else {
		return Err(ExecuteError::Validation {
			message: format!("Input for {} must be an object.", tool.name),
		});
	};

	for parameter in &tool.parameters {
		match fields.get(&parameter.name) {
			None | Some(Value::Null) =>
				if parameter.required {
					return Err(ExecuteError::Validation {
						message: format!("Missing required parameter {}.", parameter.name),
					});
				},
			Some(value) =>
				if !parameter.kind.matches(value) {
					return Err(ExecuteError::Validation {
						message: format!(
							"Parameter {} must be of type {}.",
							parameter.name,
							parameter.kind.as_str()
						),
					});
				},
		}
	}

	Ok(())
}
