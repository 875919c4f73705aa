use std::{collections::HashMap, sync::Arc};

use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;
use utils::duration::{ParseDurationError, parse_duration};

use crate::{
    alert::Severity,
    channel::{Channel, ChannelError},
    channels::{
        ConsoleChannel, EmailChannel, PagerDutyChannel, SlackChannel, SmtpSender, TelegramChannel,
        WebhookChannel,
    },
    rules::{AlertRule, RuleCondition},
};

#[derive(Debug, Error)]
pub enum AlertConfigError {
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error("rule {rule:?}: unknown type {value:?}")]
    UnknownRuleType { rule: String, value: String },
    #[error("rule {rule:?}: {source}")]
    BadCooldown {
        rule: String,
        source: ParseDurationError,
    },
    #[error("bad channel config: {0}")]
    BadChannel(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    rules: Vec<RawRule>,
    #[serde(default)]
    channels: Vec<ChannelConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    name: String,
    #[serde(rename = "type")]
    rule_type: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    cooldown: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    condition: RuleCondition,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub severities: Vec<String>,
    #[serde(flatten)]
    pub settings: ChannelSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelSettings {
    Slack {
        webhook_url: String,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
    },
    Email {
        smtp_host: String,
        #[serde(default)]
        smtp_port: Option<u16>,
        #[serde(default)]
        smtp_username: Option<String>,
        #[serde(default)]
        smtp_password: Option<String>,
        from: String,
        to: Vec<String>,
        #[serde(default)]
        subject_template: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        secret: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Pagerduty {
        routing_key: String,
    },
    Console,
}

/// Declarative alerting configuration: `rules[]` and `channels[]`.
#[derive(Debug)]
pub struct AlertConfig {
    pub rules: Vec<AlertRule>,
    pub channels: Vec<ChannelConfig>,
}

impl AlertConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, AlertConfigError> {
        let raw: RawConfig = toml::from_str(input)?;

        let mut rules = Vec::with_capacity(raw.rules.len());
        for r in raw.rules {
            let rule_type = r
                .rule_type
                .parse()
                .map_err(|_| AlertConfigError::UnknownRuleType {
                    rule: r.name.clone(),
                    value: r.rule_type.clone(),
                })?;
            let cooldown =
                parse_duration(&r.cooldown).map_err(|source| AlertConfigError::BadCooldown {
                    rule: r.name.clone(),
                    source,
                })?;
            rules.push(AlertRule {
                name: r.name,
                rule_type,
                enabled: r.enabled,
                condition: r.condition,
                severity: Severity::parse_or_warning(&r.severity),
                channels: r.channels,
                cooldown,
                description: r.description,
            });
        }

        Ok(AlertConfig {
            rules,
            channels: raw.channels,
        })
    }

    /// Instantiate the configured delivery adapters.
    pub fn build_channels(&self) -> Result<Vec<Arc<dyn Channel>>, AlertConfigError> {
        self.channels.iter().map(build_channel).collect()
    }
}

fn parse_severities(raw: &[String]) -> Vec<Severity> {
    raw.iter().map(|s| Severity::parse_or_warning(s)).collect()
}

pub fn build_channel(config: &ChannelConfig) -> Result<Arc<dyn Channel>, AlertConfigError> {
    let severities = parse_severities(&config.severities);
    let channel: Arc<dyn Channel> = match &config.settings {
        ChannelSettings::Slack { webhook_url } => Arc::new(
            SlackChannel::new(&config.name, webhook_url)
                .with_severities(severities)
                .with_enabled(config.enabled),
        ),
        ChannelSettings::Telegram { bot_token, chat_id } => Arc::new(
            TelegramChannel::new(&config.name, bot_token, chat_id)
                .with_severities(severities)
                .with_enabled(config.enabled),
        ),
        ChannelSettings::Email {
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            from,
            to,
            subject_template,
        } => {
            let sender = SmtpSender::new(
                smtp_host,
                *smtp_port,
                smtp_username.clone(),
                smtp_password.clone(),
            )?;
            Arc::new(
                EmailChannel::new(&config.name, from, to.clone(), Arc::new(sender))
                    .with_subject_template(subject_template.clone())
                    .with_severities(severities)
                    .with_enabled(config.enabled),
            )
        }
        ChannelSettings::Webhook {
            url,
            method,
            secret,
            headers,
        } => {
            let method = match method {
                Some(m) => Method::from_bytes(m.to_uppercase().as_bytes())
                    .map_err(|_| AlertConfigError::BadChannel(format!("bad method {m:?}")))?,
                None => Method::POST,
            };
            Arc::new(
                WebhookChannel::new(&config.name, url)
                    .with_method(method)
                    .with_secret(secret.clone())
                    .with_headers(headers.clone())
                    .with_severities(severities)
                    .with_enabled(config.enabled),
            )
        }
        ChannelSettings::Pagerduty { routing_key } => Arc::new(
            PagerDutyChannel::new(&config.name, routing_key)
                .with_severities(severities)
                .with_enabled(config.enabled),
        ),
        ChannelSettings::Console => Arc::new(
            ConsoleChannel::new(&config.name)
                .with_severities(severities)
                .with_enabled(config.enabled),
        ),
    };
    Ok(channel)
}
