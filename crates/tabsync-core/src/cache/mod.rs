//! In-memory caching for reference and admin data.
//!
//! This module provides the `EntityRegistry` of named `EntityCache`s. Entries
//! have no TTL: a view fetches when `loaded` is false and otherwise renders
//! what is there, so navigating away and back does not flicker.
//!
//! Cached data types include:
//! - Service categories and per-category service types
//! - KYC requirements per service type or user service
//! - Admin users, contributors and services

pub mod entry;
pub mod registry;

pub use entry::CacheEntry;
pub use registry::{CacheRead, EntityCache, EntityRegistry, ViewState};
