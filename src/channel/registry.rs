//! Provider lookup table, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::notification::Channel;

use super::ChannelProvider;

/// Maps each channel to its provider.
///
/// Built once from the set of registered providers; lookups are read-only
/// afterwards. A channel without an entry fails permanently at delivery
/// time.
pub struct ProviderRegistry {
    providers: HashMap<Channel, Arc<dyn ChannelProvider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn ChannelProvider>>) -> Self {
        let mut map: HashMap<Channel, Arc<dyn ChannelProvider>> = HashMap::new();
        for provider in providers {
            let channel = provider.channel();
            if map.insert(channel, provider).is_some() {
                tracing::warn!(channel = %channel, "Duplicate provider registration, last one wins");
            }
        }
        Self { providers: map }
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelProvider>> {
        self.providers.get(&channel).cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.providers.keys().copied().collect()
    }
}
