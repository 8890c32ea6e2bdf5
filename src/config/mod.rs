mod settings;

pub use settings::{
    DatabaseConfig, DeliveryConfig, PreferenceConfig, Settings, TelegramConfig,
};
