//! Notification templates
//!
//! Handlebars templates keyed by template key. Rendering happens at enqueue
//! time so queue rows carry the final subject and body.

use std::collections::HashMap;

use anyhow::{Context, Result};
use handlebars::Handlebars;

#[derive(Debug, Clone)]
pub struct NotificationTemplate {
    pub key: String,
    pub subject_template: String,
    pub body_template: String,
}

#[derive(Debug, Clone)]
pub struct RenderedNotification {
    pub subject: String,
    pub body: String,
}

pub struct TemplateCatalog {
    handlebars: Handlebars<'static>,
    templates: HashMap<String, NotificationTemplate>,
}

impl TemplateCatalog {
    pub fn new() -> Self {
        let mut catalog = Self {
            handlebars: Handlebars::new(),
            templates: HashMap::new(),
        };
        catalog.register_builtin_templates();
        catalog
    }

    fn register(&mut self, key: &str, subject: &str, body: &str) {
        self.templates.insert(
            key.to_string(),
            NotificationTemplate {
                key: key.to_string(),
                subject_template: subject.to_string(),
                body_template: body.to_string(),
            },
        );
    }

    fn register_builtin_templates(&mut self) {
        self.register(
            "entity_submitted",
            "{{entity_type}} {{entity_id}} submitted for approval",
            "Hello {{recipient_name}},\n\n\
             {{entity_type}} {{entity_id}} was submitted by {{actor}} and is now \
             awaiting approval at stage {{stage}}.\n\n\
             Amount: {{amount}}\n\
             Company: {{company_id}}\n\n\
             Procura Procurement Portal",
        );
        self.register(
            "approval_request",
            "Approval needed: {{entity_type}} {{entity_id}}",
            "Hello {{recipient_name}},\n\n\
             {{entity_type}} {{entity_id}} reached stage {{stage}} and needs your \
             review.\n\n\
             Amount: {{amount}}\n\
             Requested by: {{actor}}\n\n\
             Procura Procurement Portal",
        );
        self.register(
            "entity_approved",
            "{{entity_type}} {{entity_id}} fully approved",
            "Hello {{recipient_name}},\n\n\
             {{entity_type}} {{entity_id}} completed its approval workflow and is \
             now approved.\n\n\
             Procura Procurement Portal",
        );
        self.register(
            "entity_rejected",
            "{{entity_type}} {{entity_id}} was {{action}}",
            "Hello {{recipient_name}},\n\n\
             {{entity_type}} {{entity_id}} was {{action}} by {{actor}} at stage \
             {{stage}}.\n\
             Reason: {{reason}}\n\n\
             Procura Procurement Portal",
        );
        self.register(
            "approval_escalation",
            "Escalated: {{entity_type}} {{entity_id}}",
            "Hello {{recipient_name}},\n\n\
             {{entity_type}} {{entity_id}} was escalated past stage {{stage}} by \
             {{actor}} and now requires your attention.\n\n\
             Procura Procurement Portal",
        );
        self.register(
            "approval_reminder",
            "Reminder: {{entity_type}} {{entity_id}} awaits your approval",
            "Hello {{recipient_name}},\n\n\
             {{entity_type}} {{entity_id}} has been waiting at stage {{stage}}.\n\n\
             Procura Procurement Portal",
        );
        self.register(
            "generic",
            "{{event}}: {{entity_type}} {{entity_id}}",
            "Hello {{recipient_name}},\n\n\
             Event {{event}} occurred for {{entity_type}} {{entity_id}}.\n\n\
             Procura Procurement Portal",
        );
    }

    pub fn has_template(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    /// Renders `key`, falling back to the generic template for unknown keys
    /// so a misconfigured mapping still produces a deliverable message.
    pub fn render(
        &self,
        key: &str,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedNotification> {
        let template = match self.templates.get(key) {
            Some(t) => t,
            None => {
                tracing::warn!(template_key = %key, "Unknown template key, using generic");
                self.templates
                    .get("generic")
                    .context("generic template missing")?
            }
        };

        let subject = self
            .handlebars
            .render_template(&template.subject_template, variables)
            .context("Failed to render subject")?;
        let body = self
            .handlebars
            .render_template(&template.body_template, variables)
            .context("Failed to render body")?;

        Ok(RenderedNotification { subject, body })
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<String, String> {
        HashMap::from([
            ("entity_type".to_string(), "ORDER".to_string()),
            ("entity_id".to_string(), "ORD-1001".to_string()),
            ("recipient_name".to_string(), "Dana".to_string()),
            ("stage".to_string(), "PENDING_FINANCE_APPROVAL".to_string()),
            ("actor".to_string(), "usr-7".to_string()),
            ("amount".to_string(), "1250".to_string()),
            ("company_id".to_string(), "CMP-001".to_string()),
            ("event".to_string(), "ENTITY_APPROVED".to_string()),
        ])
    }

    #[test]
    fn test_render_known_template() {
        let catalog = TemplateCatalog::new();
        let rendered = catalog.render("approval_request", &vars()).unwrap();
        assert_eq!(rendered.subject, "Approval needed: ORDER ORD-1001");
        assert!(rendered.body.contains("PENDING_FINANCE_APPROVAL"));
        assert!(rendered.body.contains("Hello Dana"));
    }

    #[test]
    fn test_unknown_key_falls_back_to_generic() {
        let catalog = TemplateCatalog::new();
        let rendered = catalog.render("no_such_template", &vars()).unwrap();
        assert_eq!(rendered.subject, "ENTITY_APPROVED: ORDER ORD-1001");
    }
}
