//! # Longbox Common Library
//!
//! Shared code for the Longbox workspace:
//! - Error type for configuration loading and stored-row decoding
//! - TOML configuration loading and config-file resolution
//! - Logging initialisation
//! - Event types (LongboxEvent) and the broadcast EventBus
//! - Timestamp and UUID column decoding

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
