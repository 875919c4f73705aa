//! Process-wide adapter registry.
//!
//! Integrations register themselves once at startup; lookups are cheap
//! clones of the `Arc`. `all` returns a copy so callers cannot mutate the
//! registry, and `reset` exists for tests.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use once_cell::sync::Lazy;

use crate::channel::Channel;

static ADAPTERS: Lazy<RwLock<HashMap<String, Arc<dyn Channel>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register an adapter. A duplicate name wins over the previous entry.
pub fn register(channel: Arc<dyn Channel>) {
    ADAPTERS
        .write()
        .unwrap()
        .insert(channel.name().to_string(), channel);
}

pub fn get(name: &str) -> Option<Arc<dyn Channel>> {
    ADAPTERS.read().unwrap().get(name).cloned()
}

pub fn all() -> Vec<Arc<dyn Channel>> {
    ADAPTERS.read().unwrap().values().cloned().collect()
}

pub fn reset() {
    ADAPTERS.write().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{alert::Alert, channel::ChannelError};

    struct Stub(&'static str);

    #[async_trait]
    impl Channel for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn kind(&self) -> &'static str {
            "stub"
        }
        async fn send(&self, _alert: &Alert) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[test]
    fn register_get_all_reset() {
        reset();
        register(Arc::new(Stub("a")));
        register(Arc::new(Stub("b")));
        assert!(get("a").is_some());
        assert_eq!(all().len(), 2);

        // Write-wins on a duplicate name.
        register(Arc::new(Stub("a")));
        assert_eq!(all().len(), 2);

        reset();
        assert!(get("a").is_none());
        assert!(all().is_empty());
    }
}
