mod diag_config;
mod options;

// Re-export the on-disk configuration
pub use diag_config::{
    load_config,
    CommandConfig,
    DiagConfig,
    FilterConfig,
    JournaldConfig,
    MqttConfig,
};

// Re-export the validated run options
pub use options::{
    CollectionOptions,
    CommandSpec,
    FilterSpec,
};
