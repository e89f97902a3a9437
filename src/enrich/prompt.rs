//! Instruction template and response payload recovery

use serde::Deserialize;

/// Marks the end of the instruction section in a model response
pub const INSTRUCTION_END: &str = "[/INST]";

const TEMPLATE: &str = r#"
[INST] Extract action items from the following Paragraph. If there are no action items, summarize the Paragraph. The final result should be presented as a JSON array of strings of action items assigned to a variable named 'ActionItems'. If no action items are present, then the array should contain a single summary string assigned to the same variable.

The output must be in the following format: "{'ActionItems':[...]}"
***********************************************************
Paragraph:
{email}?
***********************************************************
[/INST]"#;

/// Embed a record's text in the fixed instruction template.
pub fn render(text: &str) -> String {
    TEMPLATE.replacen("{email}", text, 1)
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(rename = "ActionItems")]
    action_items: Vec<String>,
}

/// Parse the first JSON value at the start of `text`, ignoring whatever
/// follows it.
fn leading_payload(text: &str) -> Option<Payload> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Payload>()
        .next()?
        .ok()
}

/// Recover the action items (or single summary) from a model response.
///
/// Everything up to the last [`INSTRUCTION_END`] is discarded. The first
/// `{...}` object in the remainder that reads as `{"ActionItems": [..]}`
/// wins, accepting single-quoted JSON; text around it is ignored. Anything
/// malformed yields an empty list.
pub fn parse_action_items(response: &str) -> Vec<String> {
    let Some((_, tail)) = response.rsplit_once(INSTRUCTION_END) else {
        return Vec::new();
    };

    tail.match_indices('{')
        .find_map(|(start, _)| {
            let candidate = &tail[start..];
            leading_payload(candidate).or_else(|| leading_payload(&requote(candidate)))
        })
        .map(|p| {
            p.action_items
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Rewrite single-quoted JSON strings as double-quoted ones.
///
/// Apostrophes inside words (`client's`) are kept as text.
fn requote(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match in_string {
            None => match c {
                '\'' | '"' => {
                    in_string = Some(c);
                    out.push('"');
                }
                _ => out.push(c),
            },
            Some(quote) => {
                if c == '\\' && i + 1 < chars.len() {
                    out.push(c);
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == quote && closes_string(&chars, i + 1) {
                    in_string = None;
                    out.push('"');
                } else if c == '"' {
                    out.push_str("\\\"");
                } else {
                    out.push(c);
                }
            }
        }
        i += 1;
    }
    out
}

/// A quote closes a string when the next non-space char is structural.
fn closes_string(chars: &[char], from: usize) -> bool {
    chars[from..]
        .iter()
        .find(|c| !c.is_whitespace())
        .map_or(true, |c| matches!(c, ',' | ':' | ']' | '}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_embeds_text_once() {
        let prompt = render("From: a\nTo: b");
        assert!(prompt.contains("Paragraph:\nFrom: a\nTo: b?"));
        assert!(prompt.trim_end().ends_with(INSTRUCTION_END));
        assert!(!prompt.contains("{email}"));
    }

    #[test]
    fn test_parse_single_quoted_payload() {
        let response = "...[/INST]{'ActionItems':['call client','send report']}";
        assert_eq!(parse_action_items(response), vec!["call client", "send report"]);
    }

    #[test]
    fn test_parse_double_quoted_with_surrounding_text() {
        let response = format!(
            "{}\nSure! Here you go:\n{{\"ActionItems\": [\"Review the contract\"]}}\nHope that helps.",
            render("x")
        );
        assert_eq!(parse_action_items(&response), vec!["Review the contract"]);
    }

    #[test]
    fn test_parse_keeps_apostrophes_inside_items() {
        let response = "[/INST] {'ActionItems': ['review the client's draft', 'reply']}";
        assert_eq!(
            parse_action_items(response),
            vec!["review the client's draft", "reply"]
        );
    }

    #[test]
    fn test_parse_uses_text_after_last_delimiter() {
        // The echoed instruction itself contains a format example
        let response = format!("{}{{'ActionItems':['summary line']}}", render("body"));
        assert_eq!(parse_action_items(&response), vec!["summary line"]);
    }

    #[test]
    fn test_parse_ignores_braces_after_payload() {
        let response = "[/INST] {'ActionItems':['a']} (see {ref})";
        assert_eq!(parse_action_items(response), vec!["a"]);

        let response = "[/INST] {'ActionItems':['call client','send report']}\nLet me know if you'd like more {details}.";
        assert_eq!(parse_action_items(response), vec!["call client", "send report"]);
    }

    #[test]
    fn test_parse_skips_braces_before_payload() {
        let response = "[/INST] Notes {draft}: {\"ActionItems\": [\"reply to Bob\"]}";
        assert_eq!(parse_action_items(response), vec!["reply to Bob"]);
    }

    #[test]
    fn test_missing_delimiter_is_empty() {
        assert!(parse_action_items("{'ActionItems':['x']}").is_empty());
    }

    #[test]
    fn test_malformed_payloads_are_empty() {
        assert!(parse_action_items("[/INST]").is_empty());
        assert!(parse_action_items("[/INST] no json here").is_empty());
        assert!(parse_action_items("[/INST] {'Other':['x']}").is_empty());
        assert!(parse_action_items("[/INST] {'ActionItems': 'not a list'}").is_empty());
        assert!(parse_action_items("[/INST] {'ActionItems':[").is_empty());
    }
}
