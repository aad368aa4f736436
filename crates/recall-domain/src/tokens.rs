/// Token estimate used when no provider-native counter is available: one token
/// per four characters, rounded up.
pub fn estimate(text: &str) -> u32 {
	text.chars().count().div_ceil(4) as u32
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rounds_up_to_the_next_token() {
		assert_eq!(estimate(""), 0);
		assert_eq!(estimate("a"), 1);
		assert_eq!(estimate("abcd"), 1);
		assert_eq!(estimate("abcde"), 2);
		assert_eq!(estimate(&"x".repeat(8_000)), 2_000);
	}
}
