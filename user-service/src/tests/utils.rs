use async_trait::async_trait;
use axum::Router;
use prometheus::Registry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

use crate::routes;
use crate::service::{NewUser, UserService};
use user_api_shared::error::{Result as StoreResult, StoreError};
use user_api_shared::models::{now, NewUserRecord, UserRecord};
use user_api_shared::store::{memory::MemoryUserStore, UserStore};
use user_api_shared::telemetry::Telemetry;
use user_api_shared::test_utils::test_logging::init_test_logging;

pub fn new_user(first_name: &str, last_name: &str, email: &str) -> NewUser {
    NewUser {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: email.to_string(),
        phone_number: Some("+1234567890".to_string()),
    }
}

pub fn memory_service() -> UserService<MemoryUserStore> {
    init_test_logging();
    UserService::new(Arc::new(MemoryUserStore::new()))
}

/// Router over a memory store holding John Doe (id 1) and Jane Smith (id 2)
pub async fn create_test_app() -> (Router, Telemetry) {
    create_test_app_with_prefix("").await
}

pub async fn create_test_app_with_prefix(prefix: &str) -> (Router, Telemetry) {
    let service = memory_service();
    service.seed().await.unwrap();

    let telemetry = Telemetry::new(Registry::new()).unwrap();
    let app = routes::create_router_with_store(service.store().clone(), telemetry.clone(), prefix);
    (app, telemetry)
}

pub fn test_telemetry() -> Telemetry {
    Telemetry::new(Registry::new()).unwrap()
}

/// Store whose every call fails, for exercising error propagation
pub struct FailingUserStore;

fn unavailable() -> StoreError {
    StoreError::InternalError("DynamoDB connection refused: user-table".to_string())
}

#[async_trait]
impl UserStore for FailingUserStore {
    async fn insert_user(&self, _user: NewUserRecord) -> StoreResult<UserRecord> {
        Err(unavailable())
    }

    async fn get_user(&self, _id: i64) -> StoreResult<Option<UserRecord>> {
        Err(unavailable())
    }

    async fn find_user_by_email(&self, _email: &str) -> StoreResult<Option<UserRecord>> {
        Err(unavailable())
    }

    async fn update_user(&self, _user: UserRecord) -> StoreResult<UserRecord> {
        Err(unavailable())
    }

    async fn delete_user(&self, _id: i64) -> StoreResult<bool> {
        Err(unavailable())
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        Err(unavailable())
    }
}

/// Store where the record is deleted between the read and the write of an
/// update
pub struct VanishingUserStore;

#[async_trait]
impl UserStore for VanishingUserStore {
    async fn insert_user(&self, _user: NewUserRecord) -> StoreResult<UserRecord> {
        Err(unavailable())
    }

    async fn get_user(&self, id: i64) -> StoreResult<Option<UserRecord>> {
        let created = now();
        Ok(Some(UserRecord {
            id,
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            email: "john@x.com".to_string(),
            phone_number: None,
            created_at: created,
            updated_at: created,
        }))
    }

    async fn find_user_by_email(&self, _email: &str) -> StoreResult<Option<UserRecord>> {
        Ok(None)
    }

    async fn update_user(&self, user: UserRecord) -> StoreResult<UserRecord> {
        Err(StoreError::NotFound(format!("User not found: {}", user.id)))
    }

    async fn delete_user(&self, _id: i64) -> StoreResult<bool> {
        Ok(false)
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        Ok(vec![])
    }
}

/// Memory store that holds every email lookup until `writers` callers have
/// made one, so all of them pass the service pre-check before any write.
/// Counts the duplicates the store itself rejected.
pub struct RacingUserStore {
    inner: MemoryUserStore,
    lookups: Barrier,
    store_conflicts: AtomicUsize,
}

impl RacingUserStore {
    pub fn new(inner: MemoryUserStore, writers: usize) -> Self {
        Self {
            inner,
            lookups: Barrier::new(writers),
            store_conflicts: AtomicUsize::new(0),
        }
    }

    pub fn store_conflicts(&self) -> usize {
        self.store_conflicts.load(Ordering::SeqCst)
    }

    fn track<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(StoreError::DuplicateEmail(_)) = &result {
            self.store_conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl UserStore for RacingUserStore {
    async fn insert_user(&self, user: NewUserRecord) -> StoreResult<UserRecord> {
        tokio::task::yield_now().await;
        let result = self.inner.insert_user(user).await;
        self.track(result)
    }

    async fn get_user(&self, id: i64) -> StoreResult<Option<UserRecord>> {
        self.inner.get_user(id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let found = self.inner.find_user_by_email(email).await;
        self.lookups.wait().await;
        found
    }

    async fn update_user(&self, user: UserRecord) -> StoreResult<UserRecord> {
        tokio::task::yield_now().await;
        let result = self.inner.update_user(user).await;
        self.track(result)
    }

    async fn delete_user(&self, id: i64) -> StoreResult<bool> {
        self.inner.delete_user(id).await
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        self.inner.list_users().await
    }
}
