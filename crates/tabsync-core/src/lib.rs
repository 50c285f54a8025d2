//! Tabsync - client-side session and cache synchronization.
//!
//! Several client contexts (tabs, windows, processes) of one origin share a
//! persistent key-value store. This crate keeps each context's view of the
//! authenticated session and its cached reference data consistent across
//! them, without a central server pushing updates:
//!
//! - `store`: the shared store seam, in-memory and file-backed
//! - `broadcast`: login/logout signals carried by store writes
//! - `auth`: the session cache with single-flight refresh
//! - `cache`: named entity caches shared within a context
//! - `poll`: interval refresh that survives callback churn
//! - `search`: debounced, epoch-guarded remote search
//! - `context`: all of the above wired together for one context

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod context;
pub mod models;
pub mod poll;
pub mod search;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use context::{Navigator, NoopNavigator, TabContext};
