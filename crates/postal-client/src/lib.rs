//! `postal-client`: resilient client for the postal office RPC service.
//!
//! Calls made while the server is unreachable are queued locally and
//! replayed in order once a background task manages to reconnect.

pub mod client;
pub mod connection;
pub mod error;

pub use client::{ClientOptions, Delivery, PostalClient};
pub use error::{ClientError, Result};
