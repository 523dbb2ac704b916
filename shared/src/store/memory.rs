use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::debug;

use super::UserStore;
use crate::error::{Result, StoreError};
use crate::models::{NewUserRecord, UserRecord};

#[derive(Default)]
struct UserTable {
    users: BTreeMap<i64, UserRecord>,
    // email -> id of the live record holding it
    emails: HashMap<String, i64>,
    last_id: i64,
}

impl UserTable {
    fn email_owner(&self, email: &str) -> Option<i64> {
        self.emails.get(email).copied()
    }
}

/// In-memory implementation of UserStore.
///
/// A single lock guards the records and the email index together, so the
/// uniqueness check and the write it protects can never interleave with
/// another writer.
#[derive(Default)]
pub struct MemoryUserStore {
    table: Arc<RwLock<UserTable>>,
}

impl MemoryUserStore {
    /// Creates a new empty in-memory user store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory user store with initial data.
    ///
    /// Records keep their ids; a record whose email is already taken is skipped.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn with_data(initial_data: Vec<UserRecord>) -> Self {
        let mut table = UserTable::default();
        for user in initial_data {
            if table.email_owner(&user.email).is_some() {
                log::warn!("Skipping seed user {}: email already present", user.id);
                continue;
            }
            table.last_id = table.last_id.max(user.id);
            table.emails.insert(user.email.clone(), user.id);
            table.users.insert(user.id, user);
        }

        Self {
            table: Arc::new(RwLock::new(table)),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserRecord> {
        let mut table = self
            .table
            .write()
            .map_err(|_| StoreError::InternalError("Failed to acquire write lock".into()))?;

        if table.email_owner(&user.email).is_some() {
            return Err(StoreError::duplicate_email(&user.email));
        }

        table.last_id += 1;
        let record = user.into_record(table.last_id);
        table.emails.insert(record.email.clone(), record.id);
        table.users.insert(record.id, record.clone());

        debug!("Inserted user {}", record.id);
        Ok(record)
    }

    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        let table = self
            .table
            .read()
            .map_err(|_| StoreError::InternalError("Failed to acquire read lock".into()))?;

        Ok(table.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let table = self
            .table
            .read()
            .map_err(|_| StoreError::InternalError("Failed to acquire read lock".into()))?;

        Ok(table
            .email_owner(email)
            .and_then(|id| table.users.get(&id))
            .cloned())
    }

    async fn update_user(&self, user: UserRecord) -> Result<UserRecord> {
        let mut table = self
            .table
            .write()
            .map_err(|_| StoreError::InternalError("Failed to acquire write lock".into()))?;

        let previous_email = match table.users.get(&user.id) {
            Some(existing) => existing.email.clone(),
            None => return Err(StoreError::NotFound(format!("User not found: {}", user.id))),
        };

        if previous_email != user.email {
            if table.email_owner(&user.email).is_some() {
                return Err(StoreError::duplicate_email(&user.email));
            }
            table.emails.remove(&previous_email);
            table.emails.insert(user.email.clone(), user.id);
        }

        table.users.insert(user.id, user.clone());
        debug!("Updated user {}", user.id);
        Ok(user)
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        let mut table = self
            .table
            .write()
            .map_err(|_| StoreError::InternalError("Failed to acquire write lock".into()))?;

        match table.users.remove(&id) {
            Some(removed) => {
                table.emails.remove(&removed.email);
                debug!("Deleted user {}", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let table = self
            .table
            .read()
            .map_err(|_| StoreError::InternalError("Failed to acquire read lock".into()))?;

        Ok(table.users.values().cloned().collect())
    }
}
