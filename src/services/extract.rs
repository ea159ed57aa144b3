use serde::de::DeserializeOwned;

use crate::error::ExtractError;

pub const DIALOGUE_MARKER: char = '—';

/// Parses the structured payload of a completion.
///
/// The generator is asked for bare JSON but often wraps it in a fenced block
/// or surrounds it with prose, so the payload is located before parsing.
pub fn extract_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractError> {
    let span = json_span(raw).ok_or(ExtractError::NoStructuredData)?;
    Ok(serde_json::from_str(span)?)
}

/// Narrows a completion to its JSON text: the inside of a ```json fence when
/// there is one, then from the first `{` or `[` to the last matching closer.
pub fn json_span(raw: &str) -> Option<&str> {
    let body = fenced_json(raw).unwrap_or(raw);

    let start = body.find(|c: char| c == '{' || c == '[')?;
    let closer = if body[start..].starts_with('{') { '}' } else { ']' };
    let end = body.rfind(closer)?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

fn fenced_json(raw: &str) -> Option<&str> {
    let open = find_ignore_ascii_case(raw, "```json")?;
    let after_tag = &raw[open + "```json".len()..];
    let close = after_tag.find("```")?;
    Some(after_tag[..close].trim())
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| {
            haystack
                .get(i..i + needle.len())
                .map_or(false, |window| window.eq_ignore_ascii_case(needle))
        })
}

/// Replaces straight double quotes with the dialogue dash.
pub fn normalize_dialogue(text: &str) -> String {
    text.replace('"', &DIALOGUE_MARKER.to_string())
}
