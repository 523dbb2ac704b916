//! Business rules for the user resource.
//!
//! `UserService` owns email uniqueness checks, the partial-update merge and
//! timestamping. Absence is reported as `None`/`false`; only conflicts and
//! store failures are errors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::UserResponse;
use user_api_shared::error::StoreError;
use user_api_shared::models::{now, NewUserRecord, UserRecord};
use user_api_shared::store::UserStore;
use user_api_shared::telemetry::redact::redact_email;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("A user with email {0} already exists")]
    DuplicateEmail(String),

    #[error(transparent)]
    Store(StoreError),
}

// Store-level uniqueness violations surface as the service conflict
impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail(email) => ServiceError::DuplicateEmail(email),
            other => ServiceError::Store(other),
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Input for creating a user; already validated by the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
}

/// Partial update. `None` leaves a field unchanged.
///
/// An empty string is also "no change" for the names and the email, but
/// clears `phone_number`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl UserPatch {
    /// The email this patch would move the user to, if any
    fn new_email<'a>(&'a self, current: &str) -> Option<&'a str> {
        self.email
            .as_deref()
            .filter(|email| !email.is_empty() && *email != current)
    }
}

fn overwrite_if_non_empty(field: &mut String, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        *field = value;
    }
}

/// Merges a patch into a record and refreshes `updated_at`.
///
/// `updated_at` never moves backwards, even if the clock does.
pub fn apply_patch(user: &mut UserRecord, patch: UserPatch, at: DateTime<Utc>) {
    overwrite_if_non_empty(&mut user.first_name, patch.first_name);
    overwrite_if_non_empty(&mut user.last_name, patch.last_name);
    overwrite_if_non_empty(&mut user.email, patch.email);
    if let Some(phone_number) = patch.phone_number {
        user.phone_number = Some(phone_number);
    }
    user.updated_at = at.max(user.updated_at);
}

pub struct UserService<S: UserStore> {
    store: Arc<S>,
}

impl<S: UserStore> UserService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn list_all(&self) -> ServiceResult<Vec<UserResponse>> {
        info!("Listing all users");
        let users = self.store.list_users().await?;
        info!("Found {} users", users.len());
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    pub async fn get_by_id(&self, id: i64) -> ServiceResult<Option<UserResponse>> {
        info!("Getting user {}", id);
        let user = self.store.get_user(id).await?;
        if user.is_none() {
            warn!("User {} not found", id);
        }
        Ok(user.map(UserResponse::from))
    }

    pub async fn create(&self, input: NewUser) -> ServiceResult<UserResponse> {
        let redacted = redact_email(&input.email);
        info!("Creating user with email {}", redacted);

        if self.store.find_user_by_email(&input.email).await?.is_some() {
            warn!("Rejected create: email {} already in use", redacted);
            return Err(ServiceError::DuplicateEmail(redacted));
        }

        let timestamp = now();
        let record = NewUserRecord {
            first_name: input.first_name,
            last_name: input.last_name,
            email: input.email,
            phone_number: input.phone_number,
            created_at: timestamp,
            updated_at: timestamp,
        };

        // The store re-checks uniqueness under its own guard; a writer that
        // slipped in after the lookup above fails here
        let created = self.store.insert_user(record).await.map_err(|err| {
            if let StoreError::DuplicateEmail(_) = err {
                warn!("Rejected create: email {} claimed concurrently", redacted);
            }
            ServiceError::from(err)
        })?;

        info!("Created user {}", created.id);
        Ok(UserResponse::from(created))
    }

    pub async fn update(&self, id: i64, patch: UserPatch) -> ServiceResult<Option<UserResponse>> {
        info!("Updating user {}", id);

        let Some(mut user) = self.store.get_user(id).await? else {
            warn!("User {} not found for update", id);
            return Ok(None);
        };

        if let Some(email) = patch.new_email(&user.email) {
            if let Some(owner) = self.store.find_user_by_email(email).await? {
                if owner.id != id {
                    let redacted = redact_email(email);
                    warn!("Rejected update of user {}: email {} in use", id, redacted);
                    return Err(ServiceError::DuplicateEmail(redacted));
                }
            }
        }

        apply_patch(&mut user, patch, now());

        match self.store.update_user(user).await {
            Ok(updated) => {
                info!("Updated user {}", id);
                Ok(Some(UserResponse::from(updated)))
            }
            Err(StoreError::NotFound(_)) => {
                warn!("User {} was deleted before the update was saved", id);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, id: i64) -> ServiceResult<bool> {
        info!("Deleting user {}", id);
        let deleted = self.store.delete_user(id).await?;
        if deleted {
            info!("Deleted user {}", id);
        } else {
            warn!("User {} not found for delete", id);
        }
        Ok(deleted)
    }

    /// Inserts the sample users when the store is empty. Returns how many
    /// were added.
    pub async fn seed(&self) -> ServiceResult<usize> {
        if !self.store.list_users().await?.is_empty() {
            info!("Store already holds users, skipping seed data");
            return Ok(0);
        }

        let mut seeded = 0;
        for user in seed_users() {
            self.create(user).await?;
            seeded += 1;
        }
        info!("Seeded {} users", seeded);
        Ok(seeded)
    }
}

fn seed_users() -> Vec<NewUser> {
    vec![
        NewUser {
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            email: "john.doe@example.com".to_string(),
            phone_number: Some("+1234567890".to_string()),
        },
        NewUser {
            first_name: "Jane".to_string(),
            last_name: "Smith".to_string(),
            email: "jane.smith@example.com".to_string(),
            phone_number: Some("+0987654321".to_string()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> UserRecord {
        let created = now();
        UserRecord {
            id: 1,
            first_name: "John".into(),
            last_name: "Doe".into(),
            email: "john@x.com".into(),
            phone_number: Some("+1234567890".into()),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_apply_patch_only_touches_present_fields() {
        let mut user = record();
        let patch = UserPatch {
            first_name: Some("Jane".into()),
            ..Default::default()
        };

        apply_patch(&mut user, patch, now());

        assert_eq!(user.first_name, "Jane");
        assert_eq!(user.last_name, "Doe");
        assert_eq!(user.email, "john@x.com");
        assert_eq!(user.phone_number.as_deref(), Some("+1234567890"));
    }

    #[test]
    fn test_apply_patch_empty_strings() {
        let mut user = record();
        let patch = UserPatch {
            first_name: Some(String::new()),
            last_name: Some(String::new()),
            email: Some(String::new()),
            phone_number: Some(String::new()),
        };

        apply_patch(&mut user, patch, now());

        assert_eq!(user.first_name, "John");
        assert_eq!(user.last_name, "Doe");
        assert_eq!(user.email, "john@x.com");
        assert_eq!(user.phone_number.as_deref(), Some(""));
    }

    #[test]
    fn test_apply_patch_clamps_clock_regression() {
        let mut user = record();
        let previous = user.updated_at;

        apply_patch(&mut user, UserPatch::default(), previous - Duration::seconds(30));

        assert_eq!(user.updated_at, previous);
    }

    #[test]
    fn test_new_email_ignores_empty_and_unchanged() {
        let same = UserPatch {
            email: Some("john@x.com".into()),
            ..Default::default()
        };
        let empty = UserPatch {
            email: Some(String::new()),
            ..Default::default()
        };
        let moved = UserPatch {
            email: Some("j@y.com".into()),
            ..Default::default()
        };

        assert_eq!(same.new_email("john@x.com"), None);
        assert_eq!(empty.new_email("john@x.com"), None);
        assert_eq!(moved.new_email("john@x.com"), Some("j@y.com"));
    }

    #[test]
    fn test_store_duplicate_is_lifted() {
        let err = ServiceError::from(StoreError::duplicate_email("john@x.com"));
        assert!(matches!(err, ServiceError::DuplicateEmail(ref e) if e == "j***@x.com"));

        let err = ServiceError::from(StoreError::InternalError("boom".into()));
        assert!(matches!(err, ServiceError::Store(_)));
    }
}
