//! Escaping for backend-sourced text.
//!
//! Answers and citations come from remote services and are never trusted as
//! markup. [`escape_html`] neutralizes everything; [`sanitize_markup`] does the
//! same and then re-admits a small set of formatting tags, attribute-free only.

/// Formatting tags allowed through [`sanitize_markup`].
pub const ALLOWED_TAGS: &[&str] = &[
    "b", "strong", "i", "em", "u", "br", "p", "ul", "ol", "li", "code", "pre",
];

const ESCAPED_OPEN: &str = "&lt;";
const ESCAPED_CLOSE: &str = "&gt;";

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Escapes `raw`, then restores `<tag>`, `</tag>` and `<tag/>` for allow-listed tags.
pub fn sanitize_markup(raw: &str) -> String {
    let escaped = escape_html(raw);
    let mut output = String::with_capacity(escaped.len());
    let mut rest = escaped.as_str();

    while let Some(start) = rest.find(ESCAPED_OPEN) {
        output.push_str(&rest[..start]);
        let candidate = &rest[start + ESCAPED_OPEN.len()..];

        match parse_allowed_tag(candidate) {
            Some((tag, consumed)) => {
                output.push_str(&tag);
                rest = &candidate[consumed..];
            }
            None => {
                output.push_str(ESCAPED_OPEN);
                rest = candidate;
            }
        }
    }

    output.push_str(rest);
    output
}

// `candidate` starts right after an escaped `<`. Returns the rebuilt tag and the
// number of bytes of `candidate` it covers, including the escaped `>`.
fn parse_allowed_tag(candidate: &str) -> Option<(String, usize)> {
    let end = candidate.find(ESCAPED_CLOSE)?;
    let inner = &candidate[..end];

    let (closing, inner) = match inner.strip_prefix('/') {
        Some(stripped) => (true, stripped),
        None => (false, inner),
    };
    let (self_closing, name) = match inner.trim_end().strip_suffix('/') {
        Some(stripped) => (true, stripped.trim_end()),
        None => (false, inner),
    };

    if closing && self_closing {
        return None;
    }

    let name = name.to_ascii_lowercase();
    if !ALLOWED_TAGS.contains(&name.as_str()) {
        return None;
    }

    let tag = match (closing, self_closing) {
        (true, _) => format!("</{name}>"),
        (false, true) => format!("<{name}/>"),
        (false, false) => format!("<{name}>"),
    };
    Some((tag, end + ESCAPED_CLOSE.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_neutralizes_markup() {
        assert_eq!(escape_html("hello"), "hello");
        assert_eq!(escape_html("a < b & c"), "a &lt; b &amp; c");
        assert_eq!(
            escape_html("<a href=\"x\">'y'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&#39;y&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn sanitize_keeps_plain_formatting_tags() {
        assert_eq!(
            sanitize_markup("<b>Bold</b> and <EM>loud</EM><br/>"),
            "<b>Bold</b> and <em>loud</em><br/>"
        );
    }

    #[test]
    fn sanitize_rejects_attributes_and_unknown_tags() {
        assert_eq!(
            sanitize_markup("<b onclick=\"x()\">hi</b>"),
            "&lt;b onclick=&quot;x()&quot;&gt;hi</b>"
        );
        assert_eq!(
            sanitize_markup("<script>alert(1)</script>"),
            "&lt;script&gt;alert(1)&lt;/script&gt;"
        );
        assert_eq!(
            sanitize_markup("<img src=x onerror=alert(1)>"),
            "&lt;img src=x onerror=alert(1)&gt;"
        );
    }

    #[test]
    fn sanitize_handles_dangling_brackets() {
        assert_eq!(sanitize_markup("1 < 2"), "1 &lt; 2");
        assert_eq!(sanitize_markup("</>"), "&lt;/&gt;");
    }
}
