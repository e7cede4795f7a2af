//! # Configuration
//!
//! Runtime settings for the engine: bot identity, logging, publishing limits,
//! attachment caching and inline command delimiters.

pub mod bot;

pub use bot::{
    AttachmentCacheConfig, BotConfig, Config, ConfigError, LogFormat, LoggingConfig,
    ParserConfig, PublisherConfig,
};
