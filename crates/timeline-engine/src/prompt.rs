use timeline_core::settings::Settings;
use timeline_core::Host;
use timeline_llm::GenerateOptions;

/// Replaces `{{key}}` placeholders, then applies the host's persona
/// substitutions.
pub fn render(host: &Host, template: &str, vars: &[(&str, &str)]) -> String {
    let mut text = template.to_string();
    for (key, value) in vars {
        text = text.replace(&format!("{{{{{}}}}}", key), value);
    }
    host.formatter.substitute(&text)
}

pub fn generate_options(settings: &Settings) -> GenerateOptions {
    GenerateOptions {
        max_tokens: settings.max_tokens,
        reasoning_effort: settings.reasoning_effort,
        overrides: Default::default(),
    }
}

/// Prefixes an optional title to a summary as a heading line.
pub fn with_title(title: Option<&str>, summary: &str) -> String {
    match title.map(str::trim).filter(|title| !title.is_empty()) {
        Some(title) => format!("## {}\n\n{}", title, summary.trim()),
        None => summary.trim().to_string(),
    }
}

/// Splits a heading line written by [`with_title`] off a summary.
pub fn split_title(summary: &str) -> (Option<&str>, &str) {
    match summary.strip_prefix("## ") {
        Some(rest) => match rest.split_once('\n') {
            Some((title, body)) => (Some(title.trim()), body.trim_start()),
            None => (Some(rest.trim()), ""),
        },
        None => (None, summary),
    }
}
