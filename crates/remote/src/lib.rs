//! HTTP transport for Remindly sync.
//!
//! Implements the `RemoteStore` contract from `remindly-core` against a
//! PostgREST-compatible backend.

pub mod client;
pub mod config;
pub mod error;

pub use client::RestRemoteStore;
pub use config::RemoteConfig;
pub use error::{RemoteClientError, Result};
