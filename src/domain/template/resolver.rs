//! Template resolution: store row first, code registry as fallback.

use std::sync::Arc;

use crate::domain::notification::{Channel, Payload};
use crate::store::TemplateRepository;

use super::engine::{render_template, TemplateEngine};
use super::types::{
    RenderedMessage, ResolvedTemplate, TemplateButton, TemplateError, TemplateResult,
    TemplateSource,
};

/// Resolves a template by key and channel.
///
/// An active store row wins over the code registry; its unrendered body is
/// captured as the audit snapshot together with its version metadata. Code
/// templates carry no version, so the rendered text doubles as the snapshot.
pub struct TemplateResolver {
    repo: Arc<dyn TemplateRepository>,
    engine: Arc<TemplateEngine>,
}

impl TemplateResolver {
    pub fn new(repo: Arc<dyn TemplateRepository>, engine: Arc<TemplateEngine>) -> Self {
        Self { repo, engine }
    }

    /// Resolve and render a template for the given key and channel.
    pub async fn resolve(
        &self,
        template_key: &str,
        channel: Channel,
        variables: &Payload,
    ) -> TemplateResult<ResolvedTemplate> {
        if let Some(row) = self.repo.find_active(template_key, channel).await? {
            let rendered = render_template(&row.body, &row.buttons, variables);
            return Ok(ResolvedTemplate {
                rendered,
                version: Some(row.version),
                policy_version: row.policy_version,
                snapshot: row.body,
                source: TemplateSource::Db,
            });
        }

        if !self.engine.has(template_key) {
            return Err(TemplateError::ResolutionFailed(template_key.to_string()));
        }

        let rendered = self.engine.render(template_key, variables)?;
        Ok(ResolvedTemplate {
            snapshot: rendered.text.clone(),
            rendered,
            version: None,
            policy_version: None,
            source: TemplateSource::Code,
        })
    }

    /// Pure rendering helper for administrative dry-runs; no store access.
    pub fn preview(
        &self,
        body: &str,
        variables: &Payload,
        buttons: &[TemplateButton],
    ) -> RenderedMessage {
        render_template(body, buttons, variables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryTemplateRepository;
    use crate::store::StoredTemplate;
    use chrono::Utc;
    use serde_json::json;

    fn vars(pairs: &[(&str, serde_json::Value)]) -> Payload {
        let mut map = Payload::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        map
    }

    fn resolver_with(repo: Arc<MemoryTemplateRepository>) -> (TemplateResolver, Arc<TemplateEngine>) {
        let engine = Arc::new(TemplateEngine::new());
        (TemplateResolver::new(repo, engine.clone()), engine)
    }

    #[tokio::test]
    async fn test_db_row_wins_over_code_template() {
        let repo = Arc::new(MemoryTemplateRepository::new());
        repo.put(StoredTemplate {
            template_key: "t1".to_string(),
            channel: Channel::Telegram,
            body: "DB says hi {{name}}".to_string(),
            buttons: vec![],
            version: "v3".to_string(),
            policy_version: Some("p1".to_string()),
            is_active: true,
            created_at: Utc::now(),
        });
        let (resolver, engine) = resolver_with(repo);
        engine.register(crate::domain::template::MessageTemplate {
            key: "t1".to_string(),
            body: "Code says hi {{name}}".to_string(),
            buttons: vec![],
        });

        let resolved = resolver
            .resolve("t1", Channel::Telegram, &vars(&[("name", json!("Alice"))]))
            .await
            .unwrap();

        assert_eq!(resolved.source, TemplateSource::Db);
        assert_eq!(resolved.rendered.text, "DB says hi Alice");
        assert_eq!(resolved.version.as_deref(), Some("v3"));
        assert_eq!(resolved.policy_version.as_deref(), Some("p1"));
        // Store snapshot is the unrendered body
        assert_eq!(resolved.snapshot, "DB says hi {{name}}");
    }

    #[tokio::test]
    async fn test_inactive_row_falls_back_to_code() {
        let repo = Arc::new(MemoryTemplateRepository::new());
        repo.put(StoredTemplate {
            template_key: "t1".to_string(),
            channel: Channel::Telegram,
            body: "retired".to_string(),
            buttons: vec![],
            version: "v1".to_string(),
            policy_version: None,
            is_active: false,
            created_at: Utc::now(),
        });
        let (resolver, engine) = resolver_with(repo);
        engine.register(crate::domain::template::MessageTemplate {
            key: "t1".to_string(),
            body: "Hello {{name}}".to_string(),
            buttons: vec![],
        });

        let resolved = resolver
            .resolve("t1", Channel::Telegram, &vars(&[("name", json!("Bob"))]))
            .await
            .unwrap();

        assert_eq!(resolved.source, TemplateSource::Code);
        assert!(resolved.version.is_none());
        assert!(resolved.policy_version.is_none());
        // Code snapshot is the rendered text
        assert_eq!(resolved.snapshot, "Hello Bob");
    }

    #[tokio::test]
    async fn test_unresolvable_key_errors() {
        let (resolver, _engine) = resolver_with(Arc::new(MemoryTemplateRepository::new()));
        let result = resolver.resolve("missing", Channel::Telegram, &Payload::new()).await;
        assert!(matches!(result, Err(TemplateError::ResolutionFailed(_))));
    }

    #[tokio::test]
    async fn test_preview_is_pure() {
        let (resolver, _engine) = resolver_with(Arc::new(MemoryTemplateRepository::new()));
        let rendered = resolver.preview(
            "Hi {{name}}",
            &vars(&[("name", json!("Eve"))]),
            &[TemplateButton {
                label: "Open".to_string(),
                callback_data: "open:{{name}}".to_string(),
            }],
        );
        assert_eq!(rendered.text, "Hi Eve");
        assert_eq!(rendered.buttons[0].callback_data, "open:Eve");
    }
}
