//! Email template rendering with Handlebars
//!
//! This module provides:
//! - `TemplateRenderer`: the rendering seam the processors call through
//! - `TemplateEngine`: Handlebars-based implementation with defaults
//!
//! Rendering is content-addressed: `Template` content looks up a
//! registered template by name, `Inline` content substitutes context
//! variables directly into the supplied subject and bodies.

use crate::job::EmailContent;
use handlebars::Handlebars;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Rendering errors. All of them are permanent from the delivery
/// pipeline's point of view: re-running the same render cannot help.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Email must have either text or HTML body")]
    EmptyBody,
}

/// Rendered template result
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
}

/// Rendering seam for the processors.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, content: &EmailContent, context: &Value) -> Result<RenderedEmail, RenderError>;
}

/// Email template definition
#[derive(Clone, Debug)]
pub struct EmailTemplate {
    pub name: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
}

/// Handlebars-based template engine
///
/// Supports:
/// - Variables: `{{name}}`
/// - Conditionals: `{{#if condition}}...{{/if}}`
/// - Loops: `{{#each items}}...{{/each}}`
/// - HTML escaping: `{{{unescaped}}}` for raw HTML
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
    templates: HashMap<String, EmailTemplate>,
}

impl TemplateEngine {
    /// Create a new TemplateEngine with default templates
    pub fn new() -> Result<Self, RenderError> {
        let mut engine = Self {
            handlebars: Handlebars::new(),
            templates: HashMap::new(),
        };

        engine.register_defaults()?;

        Ok(engine)
    }

    /// Register a template
    pub fn register(&mut self, template: EmailTemplate) -> Result<(), RenderError> {
        self.handlebars
            .register_template_string(&format!("{}_subject", template.name), &template.subject)
            .map_err(|e| RenderError::Render(format!("bad subject template: {}", e)))?;

        if let Some(text) = &template.body_text {
            self.handlebars
                .register_template_string(&format!("{}_text", template.name), text)
                .map_err(|e| RenderError::Render(format!("bad text template: {}", e)))?;
        }

        if let Some(html) = &template.body_html {
            self.handlebars
                .register_template_string(&format!("{}_html", template.name), html)
                .map_err(|e| RenderError::Render(format!("bad HTML template: {}", e)))?;
        }

        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Check if a template exists
    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// List all registered templates
    pub fn list_templates(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }

    fn render_named(&self, name: &str, context: &Value) -> Result<RenderedEmail, RenderError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| RenderError::TemplateNotFound(name.to_string()))?;

        let render = |suffix: &str| {
            self.handlebars
                .render(&format!("{}_{}", name, suffix), context)
                .map_err(|e| RenderError::Render(format!("{} {}: {}", name, suffix, e)))
        };

        let subject = render("subject")?;
        let body_text = template
            .body_text
            .as_ref()
            .map(|_| render("text"))
            .transpose()?;
        let body_html = template
            .body_html
            .as_ref()
            .map(|_| render("html"))
            .transpose()?;

        Ok(RenderedEmail {
            subject,
            body_text,
            body_html,
        })
    }

    fn render_inline(
        &self,
        subject: &str,
        text: Option<&str>,
        html: Option<&str>,
        context: &Value,
    ) -> Result<RenderedEmail, RenderError> {
        if text.is_none() && html.is_none() {
            return Err(RenderError::EmptyBody);
        }

        let render = |template: &str| {
            self.handlebars
                .render_template(template, context)
                .map_err(|e| RenderError::Render(format!("inline content: {}", e)))
        };

        Ok(RenderedEmail {
            subject: render(subject)?,
            body_text: text.map(render).transpose()?,
            body_html: html.map(render).transpose()?,
        })
    }

    /// Register default email templates
    fn register_defaults(&mut self) -> Result<(), RenderError> {
        // Welcome email
        self.register(EmailTemplate {
            name: "welcome".to_string(),
            subject: "Welcome to {{app_name}}, {{name}}!".to_string(),
            body_text: Some(
                r#"Hello {{name}},

Welcome to {{app_name}}!

We're excited to have you on board.

Best regards,
The {{app_name}} Team"#
                    .to_string(),
            ),
            body_html: Some(
                r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <h1 style="color: #2563eb;">Welcome, {{name}}!</h1>
    <p>Thank you for joining <strong>{{app_name}}</strong>.</p>
    <p>We're excited to have you on board.</p>
    <p>Best regards,<br>The {{app_name}} Team</p>
</body>
</html>"#
                    .to_string(),
            ),
        })?;

        // Email verification
        self.register(EmailTemplate {
            name: "verification".to_string(),
            subject: "Verify your email for {{app_name}}".to_string(),
            body_text: Some(
                r#"Hello {{name}},

Please verify your email address by clicking the link below:

{{verification_link}}

This link will expire in {{expiry_hours}} hours.

If you didn't create an account, you can safely ignore this email.

Best regards,
The {{app_name}} Team"#
                    .to_string(),
            ),
            body_html: Some(
                r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <h1 style="color: #2563eb;">Verify Your Email</h1>
    <p>Hello {{name}},</p>
    <p>Please verify your email address by clicking the button below:</p>
    <p style="text-align: center; margin: 30px 0;">
        <a href="{{verification_link}}"
           style="background-color: #2563eb; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">
            Verify Email
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">This link will expire in {{expiry_hours}} hours.</p>
    <p style="color: #666; font-size: 14px;">If you didn't create an account, you can safely ignore this email.</p>
    <p>Best regards,<br>The {{app_name}} Team</p>
</body>
</html>"#
                    .to_string(),
            ),
        })?;

        // Password reset
        self.register(EmailTemplate {
            name: "password_reset".to_string(),
            subject: "Password Reset Request".to_string(),
            body_text: Some(
                r#"Hello {{name}},

We received a request to reset your password.

Click the link below to reset your password:

{{reset_link}}

This link will expire in {{expiry_hours}} hours.

If you didn't request this, please ignore this email. Your password will remain unchanged.

Best regards,
The {{app_name}} Team"#
                    .to_string(),
            ),
            body_html: Some(
                r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <h1 style="color: #2563eb;">Password Reset</h1>
    <p>Hello {{name}},</p>
    <p>We received a request to reset your password.</p>
    <p style="text-align: center; margin: 30px 0;">
        <a href="{{reset_link}}"
           style="background-color: #dc2626; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">
            Reset Password
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">This link will expire in {{expiry_hours}} hours.</p>
    <p style="color: #666; font-size: 14px;">If you didn't request this, please ignore this email. Your password will remain unchanged.</p>
    <p>Best regards,<br>The {{app_name}} Team</p>
</body>
</html>"#
                    .to_string(),
            ),
        })?;

        Ok(())
    }
}

impl TemplateRenderer for TemplateEngine {
    fn render(&self, content: &EmailContent, context: &Value) -> Result<RenderedEmail, RenderError> {
        match content {
            EmailContent::Template { name } => self.render_named(name, context),
            EmailContent::Inline {
                subject,
                text,
                html,
            } => self.render_inline(subject, text.as_deref(), html.as_deref(), context),
        }
    }
}
