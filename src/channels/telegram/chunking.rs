//! Splitting long replies under Telegram's 4096-character message cap

/// Per-message limit, with margin below the hard cap
pub const MESSAGE_LIMIT: usize = 4000;

/// Split `text` into pieces of at most `limit` characters
///
/// Breaks fall on line boundaries where possible; a single line longer than
/// `limit` is cut at a character boundary. Empty input yields no chunks.
#[must_use]
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.chars().count() <= limit {
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.chars().count();
        let joined_len = current_len + usize::from(current_len > 0) + line_len;

        if joined_len <= limit {
            if current_len > 0 {
                current.push('\n');
            }
            current.push_str(line);
            current_len = joined_len;
            continue;
        }

        flush(&mut chunks, &mut current);
        current_len = 0;

        if line_len <= limit {
            current.push_str(line);
            current_len = line_len;
        } else {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
        }
    }
    flush(&mut chunks, &mut current);

    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello", MESSAGE_LIMIT), ["hello"]);
        assert!(chunk_text("  \n ", MESSAGE_LIMIT).is_empty());
    }

    #[test]
    fn test_breaks_on_lines() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(chunk_text(text, 9), ["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_long_line_is_cut_by_characters() {
        let text = "привет".repeat(3);
        let chunks = chunk_text(&text, 7);
        assert!(chunks.iter().all(|c| c.chars().count() <= 7));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_every_chunk_fits() {
        let text = (0..500)
            .map(|i| format!("{i} blocked user record line"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_text(&text, MESSAGE_LIMIT);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= MESSAGE_LIMIT));
        assert_eq!(chunks.join("\n"), text);
    }
}
