pub mod state;

pub use state::{
    ChatSettings, DEFAULT_ENDPOINT, DEFAULT_PROVIDER_ID, SettingsError, SettingsStore,
};
