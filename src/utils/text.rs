//! Text helpers shared by the selector and the family router

/// Rough token estimate for plain text: one token per 4 characters, rounded up.
///
/// Used for capability filtering and evaluation-prompt budgeting only; real
/// token counts come from the accounting tokenizers.
pub fn approx_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Truncate `text` to at most `max_chars` characters, keeping 60% of the head
/// and 40% of the tail around an ellipsis marker.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    const MARKER: &str = " [...] ";

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }
    if max_chars <= MARKER.len() {
        return chars.into_iter().take(max_chars).collect();
    }

    let keep = max_chars - MARKER.len();
    let head = keep * 6 / 10;
    let tail = keep - head;

    let mut out = String::with_capacity(max_chars);
    out.extend(chars[..head].iter());
    out.push_str(MARKER);
    out.extend(chars[chars.len() - tail..].iter());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_middle("hello", 10), "hello");
    }

    #[test]
    fn truncation_keeps_head_and_tail() {
        let text = "a".repeat(100) + &"z".repeat(100);
        let out = truncate_middle(&text, 57);
        assert_eq!(out.chars().count(), 57);
        assert!(out.starts_with("aaa"));
        assert!(out.ends_with("zzz"));
        assert!(out.contains("[...]"));
        // 60/40 split of the 50 kept characters
        assert_eq!(out.chars().take_while(|&c| c == 'a').count(), 30);
        assert_eq!(
            out.chars().rev().take_while(|&c| c == 'z').count(),
            20
        );
    }

    #[test]
    fn approx_tokens_rounds_up() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("abcd"), 1);
        assert_eq!(approx_tokens("abcde"), 2);
    }
}
