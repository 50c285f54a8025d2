//! Reference data: service categories, service types and KYC requirements.

use serde::{Deserialize, Serialize};

pub type CategoryId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Category {
    #[serde(alias = "_id")]
    pub id: CategoryId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// A service type belongs to one parent category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ServiceType {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, alias = "categoryId")]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct KycRequirement {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "label")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "documentType")]
    pub document_type: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// What a KYC requirement listing is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KycScope {
    ServiceType(String),
    UserService(String),
}

impl KycScope {
    /// Query parameter name and value for this scope.
    pub fn param(&self) -> (&'static str, &str) {
        match self {
            KycScope::ServiceType(id) => ("service_type_id", id),
            KycScope::UserService(id) => ("user_service_id", id),
        }
    }
}
