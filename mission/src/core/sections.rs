//! Extraction of tagged sections from free-form strategist responses.

use regex::Regex;

/// Return the trimmed body of the first `<tag>...</tag>` section.
///
/// Tolerates the section being wrapped in a markdown code fence. Returns `None`
/// when the tag is absent or its body is blank.
pub fn extract_section(text: &str, tag: &str) -> Option<String> {
    let tag = regex::escape(tag);
    let pattern = format!(r"(?si)<{tag}>(.*?)</{tag}>");
    let re = Regex::new(&pattern).ok()?;
    let body = re.captures(text)?.get(1)?.as_str();
    let body = strip_fence(body.trim());
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

/// Return the non-empty lines of a tagged section, with list markers removed.
pub fn extract_list_section(text: &str, tag: &str) -> Vec<String> {
    let Some(body) = extract_section(text, tag) else {
        return Vec::new();
    };
    body.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '*', '•'])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

fn strip_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
