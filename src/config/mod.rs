//! Configuration module for clusterproxy.
//!
//! Handles the config file, environment variables, and settings.

mod settings;

pub use settings::{
    expand_env_vars, ClusterSettings, LoggingSettings, Settings, SettingsError, StagingSettings,
};
