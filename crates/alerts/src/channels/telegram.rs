use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::{
    alert::{Alert, Severity},
    channel::{Channel, ChannelError},
};

const TELEGRAM_API: &str = "https://api.telegram.org/bot";

/// Characters Telegram's MarkdownV2 requires to be backslash-escaped.
const ESCAPED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if ESCAPED.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub struct TelegramChannel {
    name: String,
    enabled: bool,
    severities: Vec<Severity>,
    bot_token: String,
    chat_id: String,
    client: Client,
}

impl TelegramChannel {
    pub fn new(
        name: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            severities: Vec::new(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }

    pub fn with_severities(mut self, severities: Vec<Severity>) -> Self {
        self.severities = severities;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn build_text(alert: &Alert) -> String {
        let mut text = format!(
            "{} *{}*\n{}",
            alert.severity.emoji(),
            escape_markdown(&alert.title),
            escape_markdown(&alert.message),
        );
        let mut tail = format!("type: {}", alert.alert_type);
        if !alert.source.is_empty() {
            tail.push_str(&format!(" \u{00b7} source: {}", alert.source));
        }
        if !alert.project_path.is_empty() {
            tail.push_str(&format!(" \u{00b7} project: {}", alert.project_path));
        }
        text.push_str(&format!("\n\n_{}_", escape_markdown(&tail)));
        text
    }

    fn api_url(&self) -> String {
        format!("{}{}/sendMessage", TELEGRAM_API, self.bot_token)
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "telegram"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn severities(&self) -> &[Severity] {
        &self.severities
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": Self::build_text(alert),
            "parse_mode": "MarkdownV2",
        });
        let response = self.client.post(self.api_url()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Status(status.as_u16()));
        }
        Ok(())
    }
}
