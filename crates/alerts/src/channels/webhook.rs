use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use sha2::Sha256;

use crate::{
    alert::{Alert, Severity},
    channel::{Channel, ChannelError},
};

pub const SIGNATURE_HEADER: &str = "X-Signature-256";

/// `sha256=<lower-hex HMAC-SHA256 over the raw body>`.
pub fn signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Generic outbound webhook: the alert itself, JSON-encoded, optionally
/// signed.
pub struct WebhookChannel {
    name: String,
    enabled: bool,
    severities: Vec<Severity>,
    url: String,
    method: Method,
    headers: HashMap<String, String>,
    secret: Option<String>,
    client: Client,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            severities: Vec::new(),
            url: url.into(),
            method: Method::POST,
            headers: HashMap::new(),
            secret: None,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret;
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
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "webhook"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn severities(&self) -> &[Severity] {
        &self.severities
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(alert)
            .map_err(|e| ChannelError::Config(format!("alert serialization failed: {e}")))?;

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .header("Content-Type", "application/json");
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, signature(secret, &body));
        }

        let response = request.body(body).send().await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(ChannelError::Status(status));
        }
        Ok(())
    }
}
