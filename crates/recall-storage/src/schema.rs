pub fn render_schema(vector_dim: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded.replace("<VECTOR_DIM>", &vector_dim.to_string())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"00_extensions.sql" => out.push_str(include_str!("../../../sql/00_extensions.sql")),
				"tables/001_raw_events.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_raw_events.sql")),
				"tables/002_knowledge_chunks.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_knowledge_chunks.sql")),
				"tables/003_queue_jobs.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_queue_jobs.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_every_table_with_the_configured_dimension() {
		let sql = render_schema(768);

		assert!(sql.contains("CREATE TABLE IF NOT EXISTS raw_events"));
		assert!(sql.contains("CREATE TABLE IF NOT EXISTS knowledge_chunks"));
		assert!(sql.contains("CREATE TABLE IF NOT EXISTS queue_jobs"));
		assert!(sql.contains("vector(768)"));
		assert!(!sql.contains("<VECTOR_DIM>"));
		assert!(!sql.contains("\\ir"));
	}
}
