//! Named in-memory caches for reference and admin data.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use crate::api::{ApiClient, ApiError};
use crate::models::{
    AdminService, AdminUser, Category, CategoryId, Contributor, KycRequirement, KycScope, ServiceType,
};

/// What a reader gets back: the shared value and whether it was ever loaded.
#[derive(Debug)]
pub struct CacheRead<T> {
    pub data: Arc<T>,
    pub loaded: bool,
}

/// What a view renders after asking for data: value, loaded flag, and a
/// stable error string when the last fetch failed.
#[derive(Debug)]
pub struct ViewState<T> {
    pub data: Arc<T>,
    pub loaded: bool,
    pub error: Option<String>,
}

struct Slot<T> {
    entry: CacheEntry<T>,
    // Bumped by reset so a fetch started earlier cannot land afterwards
    generation: u64,
}

/// A single named cache entry.
///
/// Clones share the same entry, so every consumer in a context sees the
/// same value. There is no TTL: the entry changes only through `set`,
/// `reset`, or the fetch helpers.
pub struct EntityCache<T> {
    name: &'static str,
    slot: Arc<RwLock<Slot<T>>>,
    initial: Arc<T>,
}

impl<T> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            slot: self.slot.clone(),
            initial: self.initial.clone(),
        }
    }
}

impl<T: Default> EntityCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_initial(name, T::default())
    }
}

impl<T> EntityCache<T> {
    pub fn with_initial(name: &'static str, initial: T) -> Self {
        let initial = Arc::new(initial);
        Self {
            name,
            slot: Arc::new(RwLock::new(Slot {
                entry: CacheEntry::empty(initial.clone()),
                generation: 0,
            })),
            initial,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> CacheRead<T> {
        let slot = self.slot.read();
        CacheRead {
            data: slot.entry.data.clone(),
            loaded: slot.entry.loaded,
        }
    }

    /// Full entry including the fetch time, for age display.
    pub fn entry(&self) -> CacheEntry<T> {
        self.slot.read().entry.clone()
    }

    pub fn set(&self, data: T) {
        self.slot.write().entry = CacheEntry::loaded(data);
        debug!(cache = self.name, "Cache entry set");
    }

    pub fn reset(&self) {
        let mut slot = self.slot.write();
        slot.entry = CacheEntry::empty(self.initial.clone());
        slot.generation += 1;
        debug!(cache = self.name, "Cache entry reset");
    }

    /// Serve the cached value, fetching only when nothing is loaded yet.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> ViewState<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let current = self.get();
        if current.loaded {
            return ViewState {
                data: current.data,
                loaded: true,
                error: None,
            };
        }
        self.refresh(fetch).await
    }

    /// Fetch unconditionally and overwrite on success.
    /// On failure the entry is left as it was and the message is returned.
    pub async fn refresh<F, Fut>(&self, fetch: F) -> ViewState<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let generation = self.slot.read().generation;
        let result = fetch().await;

        let mut slot = self.slot.write();
        match result {
            Ok(data) if slot.generation == generation => {
                slot.entry = CacheEntry::loaded(data);
                debug!(cache = self.name, "Cache entry refreshed");
                ViewState {
                    data: slot.entry.data.clone(),
                    loaded: true,
                    error: None,
                }
            }
            Ok(_) => {
                debug!(cache = self.name, "Entry reset during fetch, result dropped");
                ViewState {
                    data: slot.entry.data.clone(),
                    loaded: slot.entry.loaded,
                    error: None,
                }
            }
            Err(e) => {
                warn!(cache = self.name, error = %e, "Cache fetch failed");
                ViewState {
                    data: slot.entry.data.clone(),
                    loaded: slot.entry.loaded,
                    error: Some(e.user_message()),
                }
            }
        }
    }
}

/// Every named entry of one client context.
///
/// Created with the context and never torn down while it lives; logout
/// resets it through [`EntityRegistry::reset_all`].
pub struct EntityRegistry {
    pub categories: EntityCache<Vec<Category>>,
    pub admin_users: EntityCache<Vec<AdminUser>>,
    pub admin_contributors: EntityCache<Vec<Contributor>>,
    pub admin_services: EntityCache<Vec<AdminService>>,
    service_types: Mutex<HashMap<CategoryId, EntityCache<Vec<ServiceType>>>>,
    kyc_requirements: Mutex<HashMap<KycScope, EntityCache<Vec<KycRequirement>>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            categories: EntityCache::new("categories"),
            admin_users: EntityCache::new("admin_users"),
            admin_contributors: EntityCache::new("admin_contributors"),
            admin_services: EntityCache::new("admin_services"),
            service_types: Mutex::new(HashMap::new()),
            kyc_requirements: Mutex::new(HashMap::new()),
        }
    }

    /// Service types under `category_id`, created empty on first use.
    pub fn service_types(&self, category_id: &str) -> EntityCache<Vec<ServiceType>> {
        self.service_types
            .lock()
            .entry(category_id.to_string())
            .or_insert_with(|| EntityCache::new("service_types"))
            .clone()
    }

    /// KYC requirements for one service type or user service.
    pub fn kyc_requirements(&self, scope: &KycScope) -> EntityCache<Vec<KycRequirement>> {
        self.kyc_requirements
            .lock()
            .entry(scope.clone())
            .or_insert_with(|| EntityCache::new("kyc_requirements"))
            .clone()
    }

    pub fn reset_all(&self) {
        self.categories.reset();
        self.admin_users.reset();
        self.admin_contributors.reset();
        self.admin_services.reset();
        // Entries stay in the map so existing handles keep seeing updates
        for cache in self.service_types.lock().values() {
            cache.reset();
        }
        for cache in self.kyc_requirements.lock().values() {
            cache.reset();
        }
        debug!("All entity caches reset");
    }

    // ===== Loaders =====

    pub async fn load_categories(&self, api: &ApiClient) -> ViewState<Vec<Category>> {
        self.categories.get_or_fetch(|| api.fetch_categories()).await
    }

    pub async fn load_service_types(&self, api: &ApiClient, category_id: &str) -> ViewState<Vec<ServiceType>> {
        self.service_types(category_id)
            .get_or_fetch(|| api.fetch_service_types(category_id))
            .await
    }

    pub async fn load_kyc_requirements(
        &self,
        api: &ApiClient,
        scope: &KycScope,
    ) -> ViewState<Vec<KycRequirement>> {
        self.kyc_requirements(scope)
            .get_or_fetch(|| api.fetch_kyc_requirements(scope))
            .await
    }

    pub async fn load_admin_users(&self, api: &ApiClient) -> ViewState<Vec<AdminUser>> {
        self.admin_users.get_or_fetch(|| api.fetch_admin_users()).await
    }

    pub async fn load_admin_contributors(&self, api: &ApiClient) -> ViewState<Vec<Contributor>> {
        self.admin_contributors
            .get_or_fetch(|| api.fetch_admin_contributors())
            .await
    }

    pub async fn load_admin_services(&self, api: &ApiClient) -> ViewState<Vec<AdminService>> {
        self.admin_services
            .get_or_fetch(|| api.fetch_admin_services())
            .await
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
