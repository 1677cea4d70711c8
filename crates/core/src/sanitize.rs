//! User-input clamping and log redaction helpers.

/// Trim and clamp user-provided text to a safe length.
///
/// Truncation is character-based so multi-byte input never splits a code
/// point.
pub fn sanitize_text(text: &str, max_length: usize) -> String {
    let cleaned = text.trim();
    if cleaned.chars().count() <= max_length {
        return cleaned.to_string();
    }
    cleaned.chars().take(max_length).collect()
}

/// Redact API keys or similar secrets from a string before logging.
pub fn redact_secrets(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("sk-") {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let body = &tail[3..];
        let run = body
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .count();
        if run >= 6 {
            out.push_str("sk-***");
            rest = &body[run..];
        } else {
            out.push_str("sk-");
            rest = body;
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_trims_and_clamps() {
        assert_eq!(sanitize_text("  hello  ", 10), "hello");
        assert_eq!(sanitize_text("abcdef", 3), "abc");
        assert_eq!(sanitize_text("один два", 4), "один");
    }

    #[test]
    fn redacts_long_key_runs_only() {
        assert_eq!(
            redact_secrets("token sk-abc123XYZ sent"),
            "token sk-*** sent"
        );
        assert_eq!(redact_secrets("short sk-ab end"), "short sk-ab end");
        assert_eq!(
            redact_secrets("sk-aaaaaa and sk-bbbbbb"),
            "sk-*** and sk-***"
        );
    }
}
