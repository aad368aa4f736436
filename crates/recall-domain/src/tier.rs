use serde::{Deserialize, Serialize};

/// Lifecycle class of a knowledge chunk. Chunks are demoted by a background
/// job and never promoted or deleted by the core.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
	Hot,
	Warm,
	Cold,
}
impl Tier {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Hot => "hot",
			Self::Warm => "warm",
			Self::Cold => "cold",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"hot" => Some(Self::Hot),
			"warm" => Some(Self::Warm),
			"cold" => Some(Self::Cold),
			_ => None,
		}
	}

	pub fn demoted(self) -> Option<Self> {
		match self {
			Self::Hot => Some(Self::Warm),
			Self::Warm => Some(Self::Cold),
			Self::Cold => None,
		}
	}
}
