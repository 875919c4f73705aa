use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    alert::Alert,
    channel::Channel,
};

/// Every delivery gets its own timeout, independent of the caller.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub channel: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Name -> channel registry with parallel fan-out delivery.
#[derive(Default)]
pub struct Dispatcher {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel; a duplicate name replaces the previous entry.
    pub fn register(&self, channel: Arc<dyn Channel>) {
        self.channels
            .write()
            .unwrap()
            .insert(channel.name().to_string(), channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.read().unwrap().get(name).cloned()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.read().unwrap().keys().cloned().collect()
    }

    /// Names of enabled channels whose severity set accepts `alert`.
    pub fn matching_names(&self, alert: &Alert) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .unwrap()
            .values()
            .filter(|c| c.enabled() && c.accepts(alert.severity))
            .map(|c| c.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Fan the alert out to the requested channels, one delivery task per
    /// name, each bounded by [`DELIVERY_TIMEOUT`]. Returns once every
    /// delivery has finished; the result list has one entry per requested
    /// name in order. Unknown names yield a `channel_not_found` result.
    pub async fn dispatch(&self, alert: &Alert, names: &[String]) -> Vec<DispatchResult> {
        let channels: Vec<(String, Option<Arc<dyn Channel>>)> = {
            let map = self.channels.read().unwrap();
            names
                .iter()
                .map(|n| (n.clone(), map.get(n).cloned()))
                .collect()
        };

        let deliveries = channels.into_iter().map(|(name, channel)| {
            let alert = alert.clone();
            async move {
                let Some(channel) = channel else {
                    return DispatchResult {
                        channel: name,
                        success: false,
                        error: Some("channel_not_found".to_string()),
                    };
                };
                match tokio::time::timeout(DELIVERY_TIMEOUT, channel.send(&alert)).await {
                    Ok(Ok(())) => DispatchResult {
                        channel: name,
                        success: true,
                        error: None,
                    },
                    Ok(Err(e)) => {
                        tracing::warn!("delivery to {name} failed: {e}");
                        DispatchResult {
                            channel: name,
                            success: false,
                            error: Some(e.to_string()),
                        }
                    }
                    Err(_) => {
                        tracing::warn!("delivery to {name} timed out");
                        DispatchResult {
                            channel: name,
                            success: false,
                            error: Some("delivery timed out".to_string()),
                        }
                    }
                }
            }
        });

        join_all(deliveries).await
    }

    /// Deliver to every enabled channel accepting the alert's severity.
    pub async fn dispatch_all(&self, alert: &Alert) -> Vec<DispatchResult> {
        let names = self.matching_names(alert);
        self.dispatch(alert, &names).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{alert::Severity, channel::ChannelError};

    struct RecordingChannel {
        name: String,
        enabled: bool,
        severities: Vec<Severity>,
        sends: AtomicUsize,
        fail: bool,
    }

    impl RecordingChannel {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                enabled: true,
                severities: Vec::new(),
                sends: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> &'static str {
            "recording"
        }
        fn enabled(&self) -> bool {
            self.enabled
        }
        fn severities(&self) -> &[Severity] {
            &self.severities
        }
        async fn send(&self, _alert: &Alert) -> Result<(), ChannelError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ChannelError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    fn alert() -> Alert {
        Alert::new("task_failed", Severity::Warning, "t", "m", "task:1", "p")
    }

    #[tokio::test]
    async fn dispatch_preserves_one_result_per_name() {
        let dispatcher = Dispatcher::new();
        let ok = Arc::new(RecordingChannel::new("ok"));
        let bad = Arc::new(RecordingChannel {
            fail: true,
            ..RecordingChannel::new("bad")
        });
        dispatcher.register(ok.clone());
        dispatcher.register(bad);

        let names = vec!["ok".to_string(), "bad".to_string(), "ghost".to_string()];
        let results = dispatcher.dispatch(&alert(), &names).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[2].error.as_deref(), Some("channel_not_found"));
        assert_eq!(ok.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_all_filters_by_enabled_and_severity() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(RecordingChannel {
            severities: vec![Severity::Critical],
            ..RecordingChannel::new("critical-only")
        }));
        dispatcher.register(Arc::new(RecordingChannel {
            enabled: false,
            ..RecordingChannel::new("disabled")
        }));
        dispatcher.register(Arc::new(RecordingChannel::new("open")));

        let results = dispatcher.dispatch_all(&alert()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].channel, "open");
    }

    #[tokio::test]
    async fn duplicate_registration_replaces() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(RecordingChannel::new("dup")));
        let second = Arc::new(RecordingChannel {
            fail: true,
            ..RecordingChannel::new("dup")
        });
        dispatcher.register(second);
        let results = dispatcher.dispatch(&alert(), &["dup".to_string()]).await;
        assert!(!results[0].success);
    }
}
