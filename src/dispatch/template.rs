//! Email templates and placeholder substitution.
//!
//! Recognized placeholders are `{{name}}`, `{{first_name}}`, `{{company}}`
//! and `{{email}}`. Each falls back to a value derived from the address when
//! the contact lacks the field. Unknown placeholders are left verbatim.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-zA-Z_]+)\s*\}\}").expect("valid placeholder regex"));

/// A stored email template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub html: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailTemplate {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            subject: subject.into(),
            html: html.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Render subject and body for one contact.
    pub fn render(&self, contact: &Contact) -> RenderedEmail {
        RenderedEmail {
            subject: render(&self.subject, contact),
            html: render(&self.html, contact),
        }
    }
}

/// A dispatch recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl Contact {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Default::default()
        }
    }

    /// Builder: set full name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: set company.
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// Full name, or the address local part.
    pub fn display_name(&self) -> String {
        non_empty(self.name.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| local_part(&self.email).to_string())
    }

    /// First name, or the first word of the display name.
    pub fn first_name(&self) -> String {
        if let Some(first) = non_empty(self.first_name.as_deref()) {
            return first.to_string();
        }
        let name = self.display_name();
        name.split_whitespace().next().unwrap_or(&name).to_string()
    }

    /// Company, or the first label of the address domain.
    pub fn company(&self) -> String {
        non_empty(self.company.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.email
                    .rsplit_once('@')
                    .and_then(|(_, domain)| domain.split('.').next())
                    .unwrap_or_default()
                    .to_string()
            })
    }
}

/// Subject and body after substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Substitute recognized placeholders in `text`.
pub fn render(text: &str, contact: &Contact) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            match caps[1].to_ascii_lowercase().as_str() {
                "name" => contact.display_name(),
                "first_name" => contact.first_name(),
                "company" => contact.company(),
                "email" => contact.email.clone(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn local_part(email: &str) -> &str {
    email.split_once('@').map(|(local, _)| local).unwrap_or(email)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_fields() {
        let contact = Contact::new("jane@acme.io")
            .with_name("Jane Doe")
            .with_company("Acme Corp");
        let out = render(
            "Hi {{first_name}} ({{name}}) at {{company}} <{{email}}>",
            &contact,
        );
        assert_eq!(out, "Hi Jane (Jane Doe) at Acme Corp <jane@acme.io>");
    }

    #[test]
    fn name_falls_back_to_local_part() {
        let contact = Contact::new("bob.smith@example.com");
        assert_eq!(render("Hello {{name}}", &contact), "Hello bob.smith");
        assert_eq!(render("{{first_name}}", &contact), "bob.smith");
        assert_eq!(render("{{company}}", &contact), "example");
    }

    #[test]
    fn blank_fields_use_fallbacks() {
        let mut contact = Contact::new("amy@shop.co").with_name("   ");
        contact.first_name = Some(String::new());
        assert_eq!(render("{{name}}/{{first_name}}", &contact), "amy/amy");
    }

    #[test]
    fn unknown_placeholders_are_kept() {
        let contact = Contact::new("x@y.z");
        assert_eq!(render("{{ unsubscribe }} {{ email }}", &contact), "{{ unsubscribe }} x@y.z");
    }

    #[test]
    fn template_renders_subject_and_body() {
        let template = EmailTemplate::new("t1", "Intro", "Hi {{first_name}}", "<p>{{company}}</p>");
        let rendered = template.render(&Contact::new("li@wei.cn").with_name("Li Wei"));
        assert_eq!(rendered.subject, "Hi Li");
        assert_eq!(rendered.html, "<p>wei</p>");
    }
}
