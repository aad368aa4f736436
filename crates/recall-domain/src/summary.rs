const TRUNCATION_LIMIT: usize = 200;

/// Degraded summary used when the summarization model is unavailable: the
/// first 200 characters cut back to a word boundary, with a trailing ellipsis.
pub fn truncate_summary(text: &str) -> String {
	let trimmed = text.trim();

	if trimmed.chars().count() <= TRUNCATION_LIMIT {
		return trimmed.to_string();
	}

	let head: String = trimmed.chars().take(TRUNCATION_LIMIT).collect();
	let cut = match head.rfind(char::is_whitespace) {
		Some(boundary) if boundary > 0 => &head[..boundary],
		_ => head.as_str(),
	};

	format!("{}...", cut.trim_end())
}
