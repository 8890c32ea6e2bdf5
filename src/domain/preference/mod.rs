mod cache;
mod resolver;
mod types;

pub use cache::TtlCache;
pub use resolver::{PreferenceResolver, DEFAULT_PREFERENCE_CACHE_TTL};
pub use types::{
    NotificationCategory, NotificationPolicy, PreferenceDecision, PreferenceReason,
    PreferenceRequest,
};
