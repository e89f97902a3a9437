//! Rendered-text extraction from HTML message bodies

use regex::Regex;
use std::sync::OnceLock;

fn hidden_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|head)\b[^>]*>.*?</(script|style|head)\s*>|<!--.*?-->")
            .expect("static regex")
    })
}

fn tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"))
}

/// Ordered, trimmed, non-empty text runs between HTML tags.
pub fn extract_text(html: &str) -> Vec<String> {
    let visible = hidden_blocks().replace_all(html, " ");
    tags()
        .split(&visible)
        .map(|run| decode_entities(run.trim()))
        .map(|run| run.trim().to_string())
        .filter(|run| !run.is_empty())
        .collect()
}

/// Lines of a plain-text body.
pub fn plain_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_runs() {
        let html = "<html><body><p>Hello Bob,</p>\n<div>Please <b>call</b> the client.</div></body></html>";
        assert_eq!(
            extract_text(html),
            vec!["Hello Bob,", "Please", "call", "the client."]
        );
    }

    #[test]
    fn test_extract_skips_style_and_script() {
        let html = "<head><style>p { color: red; }</style></head><script>var x = 1;</script><p>Body</p><!-- hidden -->";
        assert_eq!(extract_text(html), vec!["Body"]);
    }

    #[test]
    fn test_extract_decodes_entities() {
        assert_eq!(extract_text("<p>Q&amp;A &lt;today&gt;</p>"), vec!["Q&A <today>"]);
    }

    #[test]
    fn test_extract_empty() {
        assert!(extract_text("").is_empty());
        assert!(extract_text("<br/><br/>").is_empty());
    }

    #[test]
    fn test_plain_lines() {
        assert_eq!(plain_lines("a\n\n  b  \r\n"), vec!["a", "b"]);
    }
}
