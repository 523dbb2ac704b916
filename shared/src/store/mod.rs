use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewUserRecord, UserRecord};

// Expose the DynamoDB store module
pub mod dynamo;
pub mod memory;

/// UserStore trait defining the interface for user storage implementations.
///
/// Email uniqueness is a store-level constraint: `insert_user` and
/// `update_user` must fail with `StoreError::DuplicateEmail` rather than
/// persist a second live record with the same address, even when callers
/// race each other.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Persists a new user under the next id. Ids start at 1 and are never reused.
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserRecord>;

    /// Gets a user by ID
    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>>;

    /// Gets the user holding an email address (exact match)
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Replaces a stored user.
    ///
    /// Fails with `NotFound` when no record has the id and with
    /// `DuplicateEmail` when another record holds the new email.
    async fn update_user(&self, user: UserRecord) -> Result<UserRecord>;

    /// Deletes a user, returning whether a record was removed
    async fn delete_user(&self, id: i64) -> Result<bool>;

    /// Gets all users in insertion (ascending id) order
    async fn list_users(&self) -> Result<Vec<UserRecord>>;
}
