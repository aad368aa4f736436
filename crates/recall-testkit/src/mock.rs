//! Deterministic provider doubles for integration tests: no network, stable
//! vectors, scriptable chat turns.

use std::{
	collections::VecDeque,
	sync::Mutex,
};

use recall_providers::{
	BoxFuture, Capability, ChatMessage, ChatOptions, ChatResponse, CompleteOptions, Completion,
	Error, LlmProvider, Result, TokenUsage,
};

const AUTH_TERMS: [&str; 8] =
	["jwt", "oauth", "oauth2", "rs256", "auth", "authentication", "token", "api"];
const INCIDENT_TERMS: [&str; 6] = ["race", "condition", "payment", "deadlock", "fixed", "outage"];

/// Embedding double that maps text onto a small set of topic axes, so related
/// texts land close together and unrelated texts stay orthogonal. A per-token
/// jitter axis keeps distinct texts from colliding exactly.
pub struct TopicEmbedding {
	pub dimensions: usize,
}
impl TopicEmbedding {
	pub fn new(dimensions: usize) -> Self {
		assert!(dimensions >= 4, "topic embedding needs at least four dimensions");

		Self { dimensions }
	}

	pub fn vector(&self, text: &str) -> Vec<f32> {
		let mut vector = vec![0.0_f32; self.dimensions];

		for token in text.to_lowercase().split(|ch: char| !ch.is_alphanumeric()) {
			if token.is_empty() {
				continue;
			}
			if AUTH_TERMS.contains(&token) {
				vector[0] += 1.0;
			} else if INCIDENT_TERMS.contains(&token) {
				vector[1] += 1.0;
			} else {
				let axis = 2 + (stable_hash(token) as usize) % (self.dimensions - 2);

				vector[axis] += 0.15;
			}
		}

		let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();

		if norm > 0.0 {
			for value in &mut vector {
				*value /= norm;
			}
		} else {
			vector[self.dimensions - 1] = 1.0;
		}

		vector
	}
}
impl LlmProvider for TopicEmbedding {
	fn name(&self) -> &str {
		"topic-embedding"
	}

	fn supports(&self, capability: Capability) -> bool {
		matches!(capability, Capability::Embed | Capability::CountTokens)
	}

	fn embed_batch<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(texts.iter().map(|text| self.vector(text)).collect()) })
	}
}

/// Chat double whose every call fails upstream; exercises fallback paths.
pub struct FailingChat;
impl LlmProvider for FailingChat {
	fn name(&self) -> &str {
		"failing-chat"
	}

	fn supports(&self, capability: Capability) -> bool {
		matches!(capability, Capability::Chat | Capability::Complete | Capability::CountTokens)
	}

	fn complete<'a>(
		&'a self,
		_prompt: &'a str,
		_opts: &'a CompleteOptions,
	) -> BoxFuture<'a, Result<Completion>> {
		Box::pin(async { Err(Error::Upstream { message: "Model offline.".to_string() }) })
	}

	fn chat<'a>(
		&'a self,
		_messages: &'a [ChatMessage],
		_opts: &'a ChatOptions,
	) -> BoxFuture<'a, Result<ChatResponse>> {
		Box::pin(async { Err(Error::Upstream { message: "Model offline.".to_string() }) })
	}
}

/// Chat double that replays a fixed script of responses, for `complete` and
/// `chat` alike.
pub struct ScriptedChat {
	responses: Mutex<VecDeque<ChatResponse>>,
}
impl ScriptedChat {
	pub fn new(responses: Vec<ChatResponse>) -> Self {
		Self { responses: Mutex::new(responses.into()) }
	}

	pub fn text(text: &str) -> ChatResponse {
		ChatResponse { text: text.to_string(), ..ChatResponse::default() }
	}

	fn next(&self) -> Result<ChatResponse> {
		self.responses
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.pop_front()
			.ok_or_else(|| Error::Upstream { message: "Chat script exhausted.".to_string() })
	}
}
impl LlmProvider for ScriptedChat {
	fn name(&self) -> &str {
		"scripted-chat"
	}

	fn supports(&self, capability: Capability) -> bool {
		matches!(capability, Capability::Chat | Capability::Complete | Capability::CountTokens)
	}

	fn complete<'a>(
		&'a self,
		_prompt: &'a str,
		_opts: &'a CompleteOptions,
	) -> BoxFuture<'a, Result<Completion>> {
		Box::pin(async {
			let response = self.next()?;

			Ok(Completion {
				text: response.text,
				tokens_used: response.usage.map(TokenUsage::total).unwrap_or_default(),
			})
		})
	}

	fn chat<'a>(
		&'a self,
		_messages: &'a [ChatMessage],
		_opts: &'a ChatOptions,
	) -> BoxFuture<'a, Result<ChatResponse>> {
		Box::pin(async { self.next() })
	}
}

fn stable_hash(token: &str) -> u64 {
	// FNV-1a; the point is stability across runs, not quality.
	let mut hash = 0xCBF2_9CE4_8422_2325_u64;

	for byte in token.bytes() {
		hash ^= u64::from(byte);
		hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
	}

	hash
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cosine(a: &[f32], b: &[f32]) -> f32 {
		a.iter().zip(b).map(|(x, y)| x * y).sum()
	}

	#[test]
	fn related_texts_are_close_and_unrelated_are_far() {
		let embedding = TopicEmbedding::new(8);
		let jwt = embedding.vector("We need JWT for the API");
		let auth = embedding.vector("API authentication");
		let lunch = embedding.vector("lunch menu on friday");

		assert!(cosine(&jwt, &auth) >= 0.7, "related similarity too low");
		assert!(cosine(&jwt, &lunch) < 0.3, "unrelated similarity too high");
	}

	#[test]
	fn vectors_are_normalized_and_stable() {
		let embedding = TopicEmbedding::new(8);
		let first = embedding.vector("Use RS256 for JWT");
		let second = embedding.vector("Use RS256 for JWT");
		let norm = first.iter().map(|value| value * value).sum::<f32>().sqrt();

		assert_eq!(first, second);
		assert!((norm - 1.0).abs() < 1e-5);
	}
}
