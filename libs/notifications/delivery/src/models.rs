use serde::{Deserialize, Serialize};
use stream_worker::JobPriority;

/// Email priority levels for queue processing
#[derive(
    Debug,
    Clone,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EmailPriority {
    /// Urgent emails (password reset, OTP)
    High,
    /// Normal transactional emails
    #[default]
    Normal,
    /// Bulk/marketing emails
    Low,
}

impl EmailPriority {
    /// Map to the queue-level ordering hint.
    pub fn to_job_priority(&self) -> JobPriority {
        match self {
            Self::High => JobPriority::High,
            Self::Normal => JobPriority::Normal,
            Self::Low => JobPriority::Low,
        }
    }
}

/// A rendered email ready for the transport client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Unique identifier for the email
    pub id: String,
    /// Recipient email address
    pub to: String,
    /// Email subject
    pub subject: String,
    /// Plain text body
    pub body_text: Option<String>,
    /// HTML body
    pub body_html: Option<String>,
    /// Sender email (defaults to configured from address)
    pub from: Option<String>,
    /// Reply-to address
    pub reply_to: Option<String>,
    /// Provider-specific tags for analytics
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extra message headers
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Email priority
    #[serde(default)]
    pub priority: EmailPriority,
}

impl Email {
    /// Create a new email with required fields
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to: to.into(),
            subject: subject.into(),
            body_text: None,
            body_html: None,
            from: None,
            reply_to: None,
            tags: Vec::new(),
            headers: Vec::new(),
            priority: EmailPriority::Normal,
        }
    }

    /// Set plain text body
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body_text = Some(text.into());
        self
    }

    /// Set HTML body
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = Some(html.into());
        self
    }

    /// Set priority
    pub fn with_priority(mut self, priority: EmailPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set reply-to address
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Add a provider tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_builder() {
        let email = Email::new("user@example.com", "Hello")
            .with_text("plain")
            .with_html("<p>rich</p>")
            .with_priority(EmailPriority::High)
            .with_tag("digest");

        assert_eq!(email.to, "user@example.com");
        assert_eq!(email.body_text.as_deref(), Some("plain"));
        assert_eq!(email.priority, EmailPriority::High);
        assert_eq!(email.tags, vec!["digest"]);
    }

    #[test]
    fn test_priority_mapping() {
        assert_eq!(EmailPriority::High.to_job_priority(), JobPriority::High);
        assert_eq!(EmailPriority::Low.to_job_priority(), JobPriority::Low);
        assert_eq!(EmailPriority::default().to_job_priority(), JobPriority::Normal);
    }
}
