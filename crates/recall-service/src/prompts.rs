use recall_domain::enrich::Entities;

const RERANK_DOC_CHARS: usize = 200;

/// Summarization prompt: the model gets the source context and must return a
/// short, searchable summary that keeps names and technical terms.
pub fn summary_prompt(source: &str, event_type: &str, text: &str, entities: &Entities) -> String {
	let mut entity_lines = String::new();

	if !entities.users.is_empty() {
		entity_lines.push_str(&format!("Users: {}\n", entities.users.join(", ")));
	}
	if !entities.mentions.is_empty() {
		entity_lines.push_str(&format!("Mentions: {}\n", entities.mentions.join(", ")));
	}
	if !entities.keywords.is_empty() {
		entity_lines.push_str(&format!("Keywords: {}\n", entities.keywords.join(", ")));
	}

	format!(
		"Summarize this {source} {event_type} for a team knowledge base.\n\
		 Write at most 100 words. Preserve who was involved, what happened, and why.\n\
		 Keep technical terms, identifiers, and project names verbatim so the summary stays searchable.\n\
		 Return only the summary text.\n\n\
		 {entity_lines}\n\
		 Content:\n{text}"
	)
}

/// Rerank prompt: enumerated truncated chunks, answered with a comma-separated
/// list of indices, most relevant first.
pub fn rerank_prompt(query: &str, docs: &[String]) -> String {
	let mut listing = String::new();

	for (index, doc) in docs.iter().enumerate() {
		let truncated: String = doc.chars().take(RERANK_DOC_CHARS).collect();

		listing.push_str(&format!("[{index}] {truncated}\n"));
	}

	format!(
		"Rank these snippets by relevance to the query.\n\
		 Query: {query}\n\n\
		 {listing}\n\
		 Reply with the indices as a comma-separated list, most relevant first. \
		 Reply with indices only."
	)
}

/// Pulls integers out of a rerank reply in order of appearance and completes
/// them into a permutation of `0..len`: duplicates and out-of-range values are
/// dropped, unmatched indices keep their original relative order at the end.
pub fn parse_rerank_order(reply: &str, len: usize) -> Vec<usize> {
	let mut order = Vec::with_capacity(len);
	let mut current: Option<usize> = None;

	for ch in reply.chars() {
		if let Some(digit) = ch.to_digit(10) {
			current = Some(current.unwrap_or(0) * 10 + digit as usize);

			continue;
		}
		if let Some(value) = current.take()
			&& value < len
			&& !order.contains(&value)
		{
			order.push(value);
		}
	}

	if let Some(value) = current
		&& value < len
		&& !order.contains(&value)
	{
		order.push(value);
	}

	for index in 0..len {
		if !order.contains(&index) {
			order.push(index);
		}
	}

	order
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_a_clean_permutation() {
		assert_eq!(parse_rerank_order("2, 0, 1", 3), vec![2, 0, 1]);
	}

	#[test]
	fn identity_reply_is_the_identity() {
		assert_eq!(parse_rerank_order("0,1,2,3", 4), vec![0, 1, 2, 3]);
	}

	#[test]
	fn malformed_reply_falls_back_to_original_order() {
		assert_eq!(parse_rerank_order("not a list", 3), vec![0, 1, 2]);
	}

	#[test]
	fn unmatched_indices_are_appended_in_order() {
		assert_eq!(parse_rerank_order("3, 1", 5), vec![3, 1, 0, 2, 4]);
	}

	#[test]
	fn out_of_range_and_duplicate_values_are_dropped() {
		assert_eq!(parse_rerank_order("7, 1, 1, 0", 3), vec![1, 0, 2]);
	}

	#[test]
	fn prose_replies_still_yield_a_permutation() {
		assert_eq!(parse_rerank_order("I would pick [2] then [0].", 3), vec![2, 0, 1]);
	}

	#[test]
	fn rerank_prompt_enumerates_and_truncates() {
		let docs = vec!["short".to_string(), "y".repeat(400)];
		let prompt = rerank_prompt("jwt", &docs);

		assert!(prompt.contains("[0] short"));
		assert!(prompt.contains("[1] "));
		assert!(!prompt.contains(&"y".repeat(201)));
	}

	#[test]
	fn summary_prompt_carries_entities_and_content() {
		let entities = Entities {
			users: vec!["alice".to_string()],
			mentions: vec![],
			links: vec![],
			keywords: vec!["payment".to_string()],
		};
		let prompt = summary_prompt("slack", "message", "alice fixed payments", &entities);

		assert!(prompt.contains("Users: alice"));
		assert!(prompt.contains("Keywords: payment"));
		assert!(prompt.contains("alice fixed payments"));
		assert!(prompt.contains("100 words"));
	}
}
