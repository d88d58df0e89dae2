//! Email notifications
//!
//! Bodies are rendered server-side with tera from the booking fields. Two
//! transports exist: SMTP (lettre) when `email.smtp_host` is set, and a
//! logging notifier otherwise. Callers in the booking ledger treat every
//! send as fire-and-forget.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use tera::Tera;

use crate::config::EmailConfig;

const OTP_TEMPLATE: &str = "\
Your Tablebook verification code is {{ code }}.

It expires in {{ minutes }} minutes. If you did not request it, ignore this email.
";

const ACCEPTED_TEMPLATE: &str = "\
Hello {{ customer_name }},

{{ restaurant_name }} accepted your booking for {{ guest_count }} guest(s) on {{ scheduled_at }} ({{ meal_category }}).

Complete the payment to confirm your table:
{{ payment_link_url }}

{% if message %}Your note: {{ message }}
{% endif %}";

const REJECTED_TEMPLATE: &str = "\
Hello {{ customer_name }},

Unfortunately {{ restaurant_name }} could not accept your booking for {{ guest_count }} guest(s) on {{ scheduled_at }} ({{ meal_category }}).

You have not been charged. Feel free to pick another time.
";

/// Email kinds the service sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    Otp,
    Accepted,
    Rejected,
}

impl EmailTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            EmailTemplate::Otp => "otp",
            EmailTemplate::Accepted => "accepted",
            EmailTemplate::Rejected => "rejected",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            EmailTemplate::Otp => "Your verification code",
            EmailTemplate::Accepted => "Your booking was accepted",
            EmailTemplate::Rejected => "Your booking was declined",
        }
    }
}

/// Subject and plain-text body ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// Renders the built-in templates
pub struct EmailRenderer {
    tera: Tera,
}

impl EmailRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (EmailTemplate::Otp.name(), OTP_TEMPLATE),
            (EmailTemplate::Accepted.name(), ACCEPTED_TEMPLATE),
            (EmailTemplate::Rejected.name(), REJECTED_TEMPLATE),
        ])
        .context("Failed to compile email templates")?;
        Ok(Self { tera })
    }

    pub fn render(&self, template: EmailTemplate, data: &serde_json::Value) -> Result<RenderedEmail> {
        let context = tera::Context::from_serialize(data)
            .with_context(|| format!("Invalid data for email template '{}'", template.name()))?;
        let body = self
            .tera
            .render(template.name(), &context)
            .with_context(|| format!("Failed to render email template '{}'", template.name()))?;
        Ok(RenderedEmail {
            subject: template.subject().to_string(),
            body,
        })
    }
}

/// Outbound email capability
#[async_trait]
pub trait EmailNotifier: Send + Sync {
    async fn send(&self, template: EmailTemplate, to: &str, data: &serde_json::Value) -> Result<()>;
}

/// Delivers email over SMTP
pub struct SmtpEmailNotifier {
    renderer: EmailRenderer,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from = format!("{} <{}>", config.from_name, config.from)
            .parse::<Mailbox>()
            .map_err(|e| anyhow!("Invalid from address: {}", e))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| anyhow!("Failed to create SMTP transport: {}", e))?
            .port(config.smtp_port);
        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        Ok(Self {
            renderer: EmailRenderer::new()?,
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailNotifier for SmtpEmailNotifier {
    async fn send(&self, template: EmailTemplate, to: &str, data: &serde_json::Value) -> Result<()> {
        let rendered = self.renderer.render(template, data)?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to.parse().map_err(|e| anyhow!("Invalid to address: {}", e))?)
            .subject(rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| anyhow!("Failed to send email: {}", e))?;

        tracing::debug!("Sent '{}' email to {}", template.name(), to);
        Ok(())
    }
}

/// Renders and logs instead of sending; used when SMTP is not configured
pub struct LogEmailNotifier {
    renderer: EmailRenderer,
}

impl LogEmailNotifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            renderer: EmailRenderer::new()?,
        })
    }
}

#[async_trait]
impl EmailNotifier for LogEmailNotifier {
    async fn send(&self, template: EmailTemplate, to: &str, data: &serde_json::Value) -> Result<()> {
        let rendered = self.renderer.render(template, data)?;
        tracing::info!(
            "Email '{}' to {} (SMTP not configured):\n{}",
            rendered.subject,
            to,
            rendered.body
        );
        Ok(())
    }
}

/// Pick the transport from configuration
pub fn create_email_notifier(config: &EmailConfig) -> Result<Arc<dyn EmailNotifier>> {
    if config.smtp_host.trim().is_empty() {
        tracing::warn!("email.smtp_host is empty; emails will only be logged");
        return Ok(Arc::new(LogEmailNotifier::new()?));
    }
    Ok(Arc::new(SmtpEmailNotifier::new(config)?))
}

/// Generate a random 6-digit verification code
pub fn generate_verification_code() -> Result<String> {
    let mut bytes = [0u8; 4];
    getrandom::fill(&mut bytes).map_err(|e| anyhow!("Failed to read OS randomness: {}", e))?;
    Ok(format!("{:06}", u32::from_le_bytes(bytes) % 1_000_000))
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn booking_data() -> serde_json::Value {
        json!({
            "customer_name": "Ada",
            "restaurant_name": "Bistro",
            "guest_count": 2,
            "scheduled_at": "2030-05-01 19:00 UTC",
            "meal_category": "dinner",
            "payment_link_url": "https://pay.example/pl_1",
            "message": null,
        })
    }

    #[test]
    fn test_accepted_embeds_payment_link() {
        let renderer = EmailRenderer::new().unwrap();
        let email = renderer.render(EmailTemplate::Accepted, &booking_data()).unwrap();
        assert!(email.body.contains("https://pay.example/pl_1"));
        assert!(email.body.contains("Bistro"));
        assert!(email.body.contains("2 guest(s)"));
        assert!(!email.body.contains("Your note"));
    }

    #[test]
    fn test_rejected_has_no_payment_link() {
        let renderer = EmailRenderer::new().unwrap();
        let email = renderer.render(EmailTemplate::Rejected, &booking_data()).unwrap();
        assert!(!email.body.contains("https://pay.example"));
        assert!(email.body.contains("could not accept"));
    }

    #[test]
    fn test_otp_template() {
        let renderer = EmailRenderer::new().unwrap();
        let email = renderer
            .render(EmailTemplate::Otp, &json!({"code": "042917", "minutes": 10}))
            .unwrap();
        assert!(email.body.contains("042917"));
        assert_eq!(email.subject, "Your verification code");
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let renderer = EmailRenderer::new().unwrap();
        assert!(renderer.render(EmailTemplate::Otp, &json!({})).is_err());
    }

    #[test]
    fn test_verification_code_format() {
        for _ in 0..50 {
            let code = generate_verification_code().unwrap();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_log_notifier_when_smtp_unset() {
        let notifier = create_email_notifier(&EmailConfig::default()).unwrap();
        notifier
            .send(EmailTemplate::Otp, "a@example.com", &json!({"code": "123456", "minutes": 10}))
            .await
            .unwrap();
    }
}
