use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{EmailTemplate, Payload};

pub type Variables = BTreeMap<String, serde_json::Value>;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Replace `{name}` placeholders with values from `vars`.
/// Placeholders without a matching variable are left untouched.
pub fn render(template: &str, vars: &Variables) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match vars.get(name).and_then(value_text) {
                Some(value) => value,
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

fn value_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Render every part of a stored email template.
pub fn render_email(template: &EmailTemplate, vars: &Variables) -> Payload {
    Payload::Email {
        subject: render(&template.subject, vars),
        html_content: render(&template.html_content, vars),
        text_content: template.text_content.as_deref().map(|t| render(t, vars)),
    }
}
