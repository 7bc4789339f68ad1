//! Small shared helpers.

/// Truncate a string to at most `max_chars` characters, appending "..." if
/// truncated. Operates on character boundaries so multi-byte UTF-8 (emoji,
/// CJK) never splits.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_pass_through() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }

    #[test]
    fn long_strings_are_cut_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
    }

    #[test]
    fn multibyte_characters_do_not_split() {
        assert_eq!(truncate_with_ellipsis("😀😀😀😀", 2), "😀😀...");
    }
}
