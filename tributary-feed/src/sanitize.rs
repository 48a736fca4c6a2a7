//! The backend emits comments and paths into its XML without escaping `&`.

use std::borrow::Cow;

const ENTITIES: [&str; 5] = ["amp;", "lt;", "gt;", "quot;", "apos;"];

/// Escape every `&` that does not already start an entity reference.
pub fn escape_bare_ampersands(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len() + 16);
    let mut rest = raw;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        if starts_entity(tail) {
            out.push('&');
        } else {
            out.push_str("&amp;");
        }
        rest = tail;
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn starts_entity(tail: &str) -> bool {
    if ENTITIES.iter().any(|e| tail.starts_with(e)) {
        return true;
    }
    let Some(numeric) = tail.strip_prefix('#') else {
        return false;
    };
    let Some(end) = numeric.find(';') else {
        return false;
    };
    let body = &numeric[..end];
    match body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
        Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_input_is_borrowed() {
        assert!(matches!(escape_bare_ampersands("<a/>"), Cow::Borrowed(_)));
    }

    #[test]
    fn bare_ampersand_is_escaped() {
        assert_eq!(
            escape_bare_ampersands("<c>fix R&D build</c>"),
            "<c>fix R&amp;D build</c>"
        );
    }

    #[test]
    fn existing_entities_are_kept() {
        let raw = "a &amp; b &lt; c &#38; d &#x26; e";
        assert_eq!(escape_bare_ampersands(raw), raw);
    }

    #[test]
    fn trailing_and_broken_references_are_escaped() {
        assert_eq!(escape_bare_ampersands("x&"), "x&amp;");
        assert_eq!(escape_bare_ampersands("&#;"), "&amp;#;");
        assert_eq!(escape_bare_ampersands("&#xZZ;"), "&amp;#xZZ;");
    }
}
