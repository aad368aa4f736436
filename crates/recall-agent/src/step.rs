use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// One observable step of an agent run. Tagged rather than polymorphic so the
/// transcript serializes uniformly for tracing and API responses.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStep {
	Thinking {
		text: String,
		#[serde(with = "time::serde::rfc3339")]
		timestamp: OffsetDateTime,
	},
	ToolUse {
		tool: String,
		input: Value,
		result: Value,
		#[serde(with = "time::serde::rfc3339")]
		timestamp: OffsetDateTime,
	},
	Message {
		role: String,
		text: String,
		#[serde(with = "time::serde::rfc3339")]
		timestamp: OffsetDateTime,
	},
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use time::macros::datetime;

	use super::*;

	#[test]
	fn steps_serialize_with_a_type_tag() {
		let step = AgentStep::ToolUse {
			tool: "search_memory".to_string(),
			input: json!({ "query": "jwt" }),
			result: json!({ "total": 0 }),
			timestamp: datetime!(2026-07-01 12:00 UTC),
		};
		let value = serde_json::to_value(&step).expect("serialize failed");

		assert_eq!(value["type"], "tool_use");
		assert_eq!(value["tool"], "search_memory");
		assert_eq!(value["input"]["query"], "jwt");
	}
}
