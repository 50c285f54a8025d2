//! Data models for platform entities.
//!
//! This module contains the data structures the core caches or passes
//! through to views:
//!
//! - `Identity`, `Credentials`, `LoginResponse`: the authenticated user
//! - `Category`, `ServiceType`, `KycRequirement`, `KycScope`: reference data
//! - `Contributor`, `AdminUser`, `AdminService`: people and admin listings

pub mod catalog;
pub mod identity;
pub mod people;

pub use catalog::{Category, CategoryId, KycRequirement, KycScope, ServiceType};
pub use identity::{Credentials, Identity, LoginResponse};
pub use people::{AdminService, AdminUser, Contributor};
