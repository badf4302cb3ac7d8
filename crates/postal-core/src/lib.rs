//! `postal-core`: configuration and error types shared by every postal crate.

pub mod config;
pub mod error;

pub use config::PostalConfig;
pub use error::{PostalError, Result};
