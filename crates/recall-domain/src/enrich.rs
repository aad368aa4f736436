use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

const KEYWORD_MIN_LEN: usize = 4;
const KEYWORD_MIN_COUNT: usize = 2;
const KEYWORD_LIMIT: usize = 10;
const LONG_TEXT_CHARS: usize = 200;

static MENTION_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"<@([A-Z0-9]+)>").expect("mention regex must compile"));
static LINK_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"https?://[^\s<>]+").expect("link regex must compile"));

#[derive(Clone, Debug, Default, Serialize)]
pub struct Entities {
	pub users: Vec<String>,
	pub mentions: Vec<String>,
	pub links: Vec<String>,
	pub keywords: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Enrichment {
	pub text: String,
	pub entities: Entities,
	pub importance: f32,
}

pub fn enrich(source: &str, payload: &Value) -> Enrichment {
	let text = extract_text(source, payload);
	let entities = extract_entities(&text, payload);
	let importance = score_importance(source, payload, &text, &entities);

	Enrichment { text, entities, importance }
}

/// Source-specific text extraction. Unknown sources fall back to the serialized
/// payload, which is stable because JSON object keys serialize in sorted order.
pub fn extract_text(source: &str, payload: &Value) -> String {
	match source {
		"slack" => payload_str(payload, "text").unwrap_or_default().to_string(),
		"jira" => join_fields(payload, "title", "description"),
		"git" => join_fields(payload, "message", "body"),
		_ => serde_json::to_string(payload).unwrap_or_default(),
	}
}

pub fn extract_entities(text: &str, payload: &Value) -> Entities {
	let mut users = Vec::new();

	for key in ["user", "author", "assignee", "reporter"] {
		if let Some(value) = payload_str(payload, key)
			&& !value.is_empty()
			&& !users.iter().any(|existing| existing == value)
		{
			users.push(value.to_string());
		}
	}

	let mentions = MENTION_RE
		.captures_iter(text)
		.filter_map(|captures| captures.get(1))
		.map(|m| m.as_str().to_string())
		.collect();
	let links = LINK_RE.find_iter(text).map(|m| m.as_str().to_string()).collect();
	let keywords = extract_keywords(text);

	Entities { users, mentions, links, keywords }
}

/// Frequent lowercased alphanumeric tokens: length >= 4, seen at least twice,
/// at most ten, ordered by count with first occurrence breaking ties.
fn extract_keywords(text: &str) -> Vec<String> {
	let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
	let mut position = 0_usize;

	for token in text.split(|ch: char| !ch.is_alphanumeric()) {
		if token.chars().count() < KEYWORD_MIN_LEN {
			continue;
		}

		let token = token.to_lowercase();
		let entry = counts.entry(token).or_insert((0, position));

		entry.0 += 1;
		position += 1;
	}

	let mut frequent: Vec<(String, usize, usize)> = counts
		.into_iter()
		.filter(|(_, (count, _))| *count >= KEYWORD_MIN_COUNT)
		.map(|(token, (count, first))| (token, count, first))
		.collect();

	frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.2.cmp(&b.2)));
	frequent.truncate(KEYWORD_LIMIT);

	frequent.into_iter().map(|(token, _, _)| token).collect()
}

/// Heuristic salience in [0, 1], starting from a neutral 0.5.
pub fn score_importance(source: &str, payload: &Value, text: &str, entities: &Entities) -> f32 {
	let mut importance = 0.5_f32;

	if source == "slack" {
		if payload.get("thread_ts").and_then(Value::as_str).is_some() {
			importance -= 0.1;
		}
		if payload.get("reactions").and_then(Value::as_array).is_some_and(|r| !r.is_empty()) {
			importance += 0.2;
		}
	}
	if source == "jira"
		&& payload_str(payload, "priority").is_some_and(|p| matches!(p, "High" | "Critical"))
	{
		importance += 0.3;
	}
	if !entities.links.is_empty() {
		importance += 0.1;
	}
	if !entities.mentions.is_empty() {
		importance += 0.15;
	}
	if text.chars().count() > LONG_TEXT_CHARS {
		importance += 0.1;
	}

	importance.clamp(0.0, 1.0)
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
	payload.get(key).and_then(Value::as_str)
}

fn join_fields(payload: &Value, first: &str, second: &str) -> String {
	let head = payload_str(payload, first).unwrap_or_default();
	let tail = payload_str(payload, second).unwrap_or_default();

	match (head.is_empty(), tail.is_empty()) {
		(false, false) => format!("{head}\n\n{tail}"),
		(false, true) => head.to_string(),
		(true, _) => tail.to_string(),
	}
}
