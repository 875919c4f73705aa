use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
};

use crate::{
    alert::{Alert, Severity},
    channel::{Channel, ChannelError},
};

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#dc3545",
        Severity::Warning => "#ffc107",
        Severity::Info => "#0066cc",
    }
}

/// Outbound mail capability; the SMTP relay in production, a recorder in
/// tests.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), ChannelError>;
}

pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSender {
    pub fn new(
        host: &str,
        port: Option<u16>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ChannelError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)?;
        if let Some(port) = port {
            builder = builder.port(port);
        }
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(username, password));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.transport.send(message).await?;
        Ok(())
    }
}

pub struct EmailChannel {
    name: String,
    enabled: bool,
    severities: Vec<Severity>,
    from: String,
    to: Vec<String>,
    subject_template: Option<String>,
    sender: Arc<dyn EmailSender>,
}

impl EmailChannel {
    pub fn new(
        name: impl Into<String>,
        from: impl Into<String>,
        to: Vec<String>,
        sender: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            severities: Vec::new(),
            from: from.into(),
            to,
            subject_template: None,
            sender,
        }
    }

    pub fn with_subject_template(mut self, template: Option<String>) -> Self {
        self.subject_template = template;
        self
    }

    pub fn with_severities(mut self, severities: Vec<Severity>) -> Self {
        self.severities = severities;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// `{{severity}} {{type}} {{title}}` placeholders, or the default
    /// `<emoji> [<SEVERITY>] Pilot Alert: <title>`.
    pub fn build_subject(template: Option<&str>, alert: &Alert) -> String {
        match template {
            Some(template) => template
                .replace("{{severity}}", &alert.severity.to_string())
                .replace("{{type}}", &alert.alert_type)
                .replace("{{title}}", &alert.title),
            None => format!(
                "{} [{}] Pilot Alert: {}",
                alert.severity.emoji(),
                alert.severity.to_string().to_uppercase(),
                alert.title
            ),
        }
    }

    pub fn build_html(alert: &Alert) -> String {
        let color = severity_color(alert.severity);
        let mut details = String::new();
        if !alert.project_path.is_empty() {
            details.push_str(&format!(
                "<tr><td><b>Project</b></td><td>{}</td></tr>",
                alert.project_path
            ));
        }
        details.push_str(&format!(
            "<tr><td><b>Source</b></td><td>{}</td></tr>",
            alert.source
        ));
        details.push_str(&format!(
            "<tr><td><b>Time</b></td><td>{}</td></tr>",
            alert.created_at.to_rfc3339()
        ));
        for (key, value) in &alert.metadata {
            details.push_str(&format!("<tr><td><b>{key}</b></td><td>{value}</td></tr>"));
        }
        format!(
            r#"<html><body style="font-family: sans-serif;">
<div style="border-left: 6px solid {color}; padding: 12px 16px; background: #f8f9fa;">
<h2 style="margin-top: 0; color: {color};">{severity} &mdash; {title}</h2>
<p>{message}</p>
<table cellpadding="4">{details}</table>
</div>
</body></html>"#,
            severity = alert.severity.to_string().to_uppercase(),
            title = alert.title,
            message = alert.message,
        )
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "email"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn severities(&self) -> &[Severity] {
        &self.severities
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let subject = Self::build_subject(self.subject_template.as_deref(), alert);
        let html = Self::build_html(alert);
        let from: lettre::message::Mailbox = self
            .from
            .parse()
            .map_err(|e| ChannelError::Config(format!("bad from address: {e}")))?;

        for recipient in &self.to {
            let to = recipient
                .parse()
                .map_err(|e| ChannelError::Config(format!("bad recipient {recipient:?}: {e}")))?;
            let message = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(&subject)
                .header(ContentType::TEXT_HTML)
                .body(html.clone())
                .map_err(|e| ChannelError::Config(format!("mail build failed: {e}")))?;
            self.sender.send(message).await?;
        }
        Ok(())
    }
}
