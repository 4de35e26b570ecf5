//! Text helpers shared by the store and the service.

/// Phrases that commonly appear in prompt-injection payloads.
///
/// Matched case-insensitively. A hit only sets `injection_risk` on the entry;
/// nothing is rejected.
const INJECTION_MARKERS: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous instructions",
    "ignore the above",
    "disregard previous instructions",
    "disregard all prior",
    "you are now",
    "new instructions:",
    "system prompt",
    "<|im_start|>",
    "<|im_end|>",
    "<|system|>",
    "[inst]",
    "### instruction",
    "act as an unrestricted",
];

/// Build the text a passage embedding is computed from.
///
/// ```
/// use quire_types::build_embedding_text;
///
/// let text = build_embedding_text("body", &["a".to_string(), "b".to_string()], Some("Title"));
/// assert_eq!(text, "Title\nbody\ntag:a\ntag:b");
/// ```
pub fn build_embedding_text(content: &str, tags: &[String], title: Option<&str>) -> String {
    let mut text = String::with_capacity(content.len() + 16 * (tags.len() + 1));
    if let Some(title) = title.filter(|t| !t.is_empty()) {
        text.push_str(title);
        text.push('\n');
    }
    text.push_str(content);
    for tag in tags {
        text.push_str("\ntag:");
        text.push_str(tag);
    }
    text
}

/// Trim tags, drop empty ones and remove duplicates keeping first occurrence.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Heuristic prompt-injection detector over title and content.
pub fn detect_injection_risk(content: &str, title: Option<&str>) -> bool {
    let haystack = match title {
        Some(title) => format!("{title}\n{content}").to_lowercase(),
        None => content.to_lowercase(),
    };
    INJECTION_MARKERS.iter().any(|m| haystack.contains(m))
}
