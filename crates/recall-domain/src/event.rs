use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// One external observation, shaped by an adapter and not yet persisted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewRawEvent {
	pub source: String,
	pub event_type: String,
	pub external_id: Option<String>,
	pub payload: Value,
	pub metadata: Value,
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}
impl ProcessingStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Processing => "processing",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"pending" => Some(Self::Pending),
			"processing" => Some(Self::Processing),
			"completed" => Some(Self::Completed),
			"failed" => Some(Self::Failed),
			_ => None,
		}
	}

	/// Terminal statuses freeze the event; only explicit reprocessing may move it again.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_round_trips_through_strings() {
		for status in [
			ProcessingStatus::Pending,
			ProcessingStatus::Processing,
			ProcessingStatus::Completed,
			ProcessingStatus::Failed,
		] {
			assert_eq!(ProcessingStatus::parse(status.as_str()), Some(status));
		}

		assert_eq!(ProcessingStatus::parse("archived"), None);
	}

	#[test]
	fn only_completed_and_failed_are_terminal() {
		assert!(!ProcessingStatus::Pending.is_terminal());
		assert!(!ProcessingStatus::Processing.is_terminal());
		assert!(ProcessingStatus::Completed.is_terminal());
		assert!(ProcessingStatus::Failed.is_terminal());
	}
}
