//! Input validation for transcripts and administrator arguments

/// Shortest transcript worth sending to the model, after trimming
pub const MIN_TRANSCRIPT_CHARS: usize = 3;

/// Longest transcript accepted
pub const MAX_TRANSCRIPT_CHARS: usize = 5000;

/// Allowed length of a system prompt set by an administrator
pub const PROMPT_CHARS: std::ops::RangeInclusive<usize> = 10..=2000;

/// Whether a transcript has enough content to answer
///
/// Lengths are measured in characters, not bytes.
#[must_use]
pub fn is_valid_transcript(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.chars().count() < MIN_TRANSCRIPT_CHARS {
        return false;
    }
    text.chars().count() <= MAX_TRANSCRIPT_CHARS
}

/// Parse a strictly positive integer argument
#[must_use]
pub fn parse_positive(arg: &str) -> Option<u32> {
    arg.trim().parse::<u32>().ok().filter(|v| *v >= 1)
}

/// Whether a prompt length is within the administrator bounds
#[must_use]
pub fn is_valid_prompt(prompt: &str) -> bool {
    PROMPT_CHARS.contains(&prompt.trim().chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_min_boundary() {
        assert!(!is_valid_transcript("ab"));
        assert!(is_valid_transcript("abc"));
        assert!(!is_valid_transcript("  ab  "));
        assert!(!is_valid_transcript("   "));
        assert!(!is_valid_transcript(""));
    }

    #[test]
    fn test_transcript_max_boundary() {
        assert!(is_valid_transcript(&"a".repeat(5000)));
        assert!(!is_valid_transcript(&"a".repeat(5001)));
    }

    #[test]
    fn test_transcript_counts_chars_not_bytes() {
        assert!(is_valid_transcript("при"));
        assert!(!is_valid_transcript("пр"));
    }

    #[test]
    fn test_parse_positive() {
        assert_eq!(parse_positive("5"), Some(5));
        assert_eq!(parse_positive(" 20 "), Some(20));
        assert_eq!(parse_positive("0"), None);
        assert_eq!(parse_positive("-3"), None);
        assert_eq!(parse_positive("ten"), None);
    }

    #[test]
    fn test_prompt_bounds() {
        assert!(!is_valid_prompt("too short"));
        assert!(is_valid_prompt("long enough"));
        assert!(!is_valid_prompt(&"x".repeat(2001)));
    }
}
