//! In-process template registry with `{{variable}}` interpolation.

use dashmap::DashMap;

use crate::domain::notification::Payload;

use super::types::{
    MessageTemplate, RenderedButton, RenderedMessage, TemplateError, TemplateResult,
};

/// In-memory keyed template registry.
///
/// Registration is an idempotent upsert; last write wins.
pub struct TemplateEngine {
    templates: DashMap<String, MessageTemplate>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    /// Register a template; replaces any previous registration for the key.
    pub fn register(&self, template: MessageTemplate) {
        self.templates.insert(template.key.clone(), template);
    }

    /// Register a batch of templates.
    pub fn register_all(&self, templates: Vec<MessageTemplate>) {
        for template in templates {
            self.register(template);
        }
    }

    /// Check whether a key is registered.
    pub fn has(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    /// Render a registered template with the given variables.
    pub fn render(&self, key: &str, variables: &Payload) -> TemplateResult<RenderedMessage> {
        let template = self
            .templates
            .get(key)
            .map(|t| t.clone())
            .ok_or_else(|| TemplateError::NotFound(key.to_string()))?;

        Ok(render_template(&template.body, &template.buttons, variables))
    }
}

/// Render a body and button set against a variable map.
pub(crate) fn render_template(
    body: &str,
    buttons: &[super::types::TemplateButton],
    variables: &Payload,
) -> RenderedMessage {
    let text = interpolate(body, variables);
    let buttons = buttons
        .iter()
        .map(|b| RenderedButton {
            label: interpolate(&b.label, variables),
            callback_data: interpolate(&b.callback_data, variables),
        })
        .collect();
    RenderedMessage { text, buttons }
}

/// Substitute `{{identifier}}` tokens in a string.
///
/// A token whose identifier exists in `variables` is replaced by the
/// stringified value (numbers use default decimal formatting). Unmatched
/// tokens are left verbatim and logged as a diagnostic; rendering never
/// fails on them.
pub fn interpolate(template: &str, variables: &Payload) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let identifier = &after_open[..close];
                match variables.get(identifier) {
                    Some(value) => result.push_str(&stringify(value)),
                    None => {
                        tracing::debug!(
                            identifier = %identifier,
                            "No variable for template placeholder, leaving token as-is"
                        );
                        result.push_str("{{");
                        result.push_str(identifier);
                        result.push_str("}}");
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated token, keep the remainder literally
                result.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
