use timeline_core::host::ReasoningTemplate;

/// Drops a leading reasoning block delimited by `template`. Text without a
/// complete leading block is returned trimmed.
pub fn strip_reasoning_preamble(text: &str, template: &ReasoningTemplate) -> String {
    let trimmed = text.trim_start();
    if template.prefix.is_empty() || template.suffix.is_empty() {
        return text.trim().to_string();
    }

    match trimmed.strip_prefix(template.prefix.as_str()) {
        Some(rest) => match rest.find(template.suffix.as_str()) {
            Some(end) => rest[end + template.suffix.len()..].trim().to_string(),
            None => text.trim().to_string(),
        },
        None => text.trim().to_string(),
    }
}

/// Removes every complete reasoning block anywhere in `text`. Returns `None`
/// when nothing was removed.
pub fn strip_reasoning_blocks(text: &str, template: &ReasoningTemplate) -> Option<String> {
    if template.prefix.is_empty() || template.suffix.is_empty() {
        return None;
    }

    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    let mut removed = false;

    while let Some(start) = rest.find(template.prefix.as_str()) {
        let after_prefix = &rest[start + template.prefix.len()..];
        let Some(end) = after_prefix.find(template.suffix.as_str()) else {
            break;
        };
        output.push_str(&rest[..start]);
        rest = &after_prefix[end + template.suffix.len()..];
        removed = true;
    }
    output.push_str(rest);

    removed.then(|| output.trim().to_string())
}
