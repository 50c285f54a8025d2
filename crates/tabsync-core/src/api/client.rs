//! Typed calls against the platform API.
//!
//! This module provides the `ApiClient` struct wrapping any [`Transport`]
//! with one method per endpoint the core consumes.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use super::transport::{ApiRequest, Transport};
use super::ApiError;
use crate::models::{
    AdminService, AdminUser, Category, Contributor, Credentials, Identity, KycRequirement,
    KycScope, LoginResponse, ServiceType,
};

// ============================================================================
// Endpoints
// ============================================================================

const IDENTITY_ENDPOINT: &str = "auth/me";
const LOGIN_ENDPOINT: &str = "auth/login";
const LOGOUT_ENDPOINT: &str = "auth/logout";
const CATEGORIES_ENDPOINT: &str = "services/categories";
const SERVICE_TYPES_ENDPOINT: &str = "services/types";
const KYC_REQUIREMENTS_ENDPOINT: &str = "kyc/requirements";
const CONTRIBUTOR_SEARCH_ENDPOINT: &str = "contributors/search";
const ADMIN_USERS_ENDPOINT: &str = "admin/users";
const ADMIN_CONTRIBUTORS_ENDPOINT: &str = "admin/contributors";
const ADMIN_SERVICES_ENDPOINT: &str = "admin/services";

/// API client for the platform.
/// Clone is cheap - the transport is shared behind an Arc.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        debug!(endpoint = %request.endpoint, "Requesting");
        self.transport.request(&request).await?.into_data()
    }

    // ===== Authentication =====

    /// Look up who the current bearer token belongs to
    pub async fn fetch_identity(&self) -> Result<Identity, ApiError> {
        self.fetch(ApiRequest::get(IDENTITY_ENDPOINT)).await
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        let request = ApiRequest::post(LOGIN_ENDPOINT)
            .param("email", credentials.email.as_str())
            .param("password", credentials.password.as_str());
        self.fetch(request).await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.transport
            .request(&ApiRequest::post(LOGOUT_ENDPOINT))
            .await?
            .into_unit()
    }

    // ===== Reference Data =====

    pub async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError> {
        self.fetch(ApiRequest::get(CATEGORIES_ENDPOINT)).await
    }

    /// Service types under one parent category
    pub async fn fetch_service_types(&self, category_id: &str) -> Result<Vec<ServiceType>, ApiError> {
        self.fetch(ApiRequest::get(SERVICE_TYPES_ENDPOINT).param("category_id", category_id))
            .await
    }

    pub async fn fetch_kyc_requirements(&self, scope: &KycScope) -> Result<Vec<KycRequirement>, ApiError> {
        let (key, id) = scope.param();
        self.fetch(ApiRequest::get(KYC_REQUIREMENTS_ENDPOINT).param(key, id))
            .await
    }

    pub async fn search_contributors(&self, query: &str, limit: usize) -> Result<Vec<Contributor>, ApiError> {
        self.fetch(
            ApiRequest::get(CONTRIBUTOR_SEARCH_ENDPOINT)
                .param("q", query)
                .param("limit", limit),
        )
        .await
    }

    // ===== Admin Listings =====

    pub async fn fetch_admin_users(&self) -> Result<Vec<AdminUser>, ApiError> {
        self.fetch(ApiRequest::get(ADMIN_USERS_ENDPOINT)).await
    }

    pub async fn fetch_admin_contributors(&self) -> Result<Vec<Contributor>, ApiError> {
        self.fetch(ApiRequest::get(ADMIN_CONTRIBUTORS_ENDPOINT)).await
    }

    pub async fn fetch_admin_services(&self) -> Result<Vec<AdminService>, ApiError> {
        self.fetch(ApiRequest::get(ADMIN_SERVICES_ENDPOINT)).await
    }
}
