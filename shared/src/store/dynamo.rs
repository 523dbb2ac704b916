use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, ReturnValue, TransactWriteItem};
use aws_sdk_dynamodb::Client;
use log::{debug, warn};
use serde_dynamo::{from_item, to_item};
use std::collections::HashMap;

use super::UserStore;
use crate::error::{map_dynamo_error, Result, StoreError};
use crate::models::{NewUserRecord, UserRecord};

// User Store Constants
const PARTITION_KEY: &str = "pk";
const USER_PREFIX: &str = "USER#";
const EMAIL_PREFIX: &str = "EMAIL#";
const ID_COUNTER_KEY: &str = "COUNTER#user";
const ID_COUNTER_ATTR: &str = "nextId";
const EMAIL_OWNER_ATTR: &str = "userId";
const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

type Item = HashMap<String, AttributeValue>;

/// DynamoDB store for users.
///
/// Everything lives in one table keyed by `pk`:
/// - `USER#<id>` holds the user record
/// - `EMAIL#<email>` is a guard item owned by the user holding that address
/// - `COUNTER#user` is the atomic id sequence
///
/// Writes that touch an email go through `TransactWriteItems` with
/// `attribute_not_exists(pk)` on the guard item, which makes email uniqueness
/// a table-level constraint.
pub struct DynamoUserStore {
    client: Client,
    table_name: String,
}

impl DynamoUserStore {
    /// Creates a store over `table_name` using the ambient AWS configuration
    pub async fn new(table_name: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Self {
            client: Client::new(&config),
            table_name: table_name.into(),
        }
    }

    /// Creates a new DynamoDB store with the specified client and table name.
    /// This is mainly useful for testing with a local DynamoDB instance.
    pub fn with_client_and_table(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    fn user_key(id: i64) -> AttributeValue {
        AttributeValue::S(format!("{}{}", USER_PREFIX, id))
    }

    fn email_key(email: &str) -> AttributeValue {
        AttributeValue::S(format!("{}{}", EMAIL_PREFIX, email))
    }

    fn user_item(user: &UserRecord) -> Result<Item> {
        let mut item: Item = to_item(user)?;
        item.insert(PARTITION_KEY.to_string(), Self::user_key(user.id));
        Ok(item)
    }

    /// Allocates the next user id from the counter item
    async fn next_id(&self) -> Result<i64> {
        let response = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, AttributeValue::S(ID_COUNTER_KEY.to_string()))
            .update_expression("ADD #next_id :one")
            .expression_attribute_names("#next_id", ID_COUNTER_ATTR)
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(|e| map_dynamo_error("update_item", e))?;

        response
            .attributes()
            .and_then(|attrs| attrs.get(ID_COUNTER_ATTR))
            .and_then(|value| value.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok())
            .ok_or_else(|| StoreError::InternalError("DynamoDB id counter returned no value".into()))
    }

    /// Put that claims an email guard for a user, failing if it is already held
    fn claim_email(&self, email: &str, id: i64) -> Result<TransactWriteItem> {
        let put = Put::builder()
            .table_name(&self.table_name)
            .item(PARTITION_KEY, Self::email_key(email))
            .item(EMAIL_OWNER_ATTR, AttributeValue::N(id.to_string()))
            .condition_expression("attribute_not_exists(pk)")
            .build()?;

        Ok(TransactWriteItem::builder().put(put).build())
    }

    /// Delete that releases an email guard, only if the user still owns it
    fn release_email(&self, email: &str, id: i64) -> Result<TransactWriteItem> {
        let delete = Delete::builder()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, Self::email_key(email))
            .condition_expression("#owner = :owner")
            .expression_attribute_names("#owner", EMAIL_OWNER_ATTR)
            .expression_attribute_values(":owner", AttributeValue::N(id.to_string()))
            .build()?;

        Ok(TransactWriteItem::builder().delete(delete).build())
    }

    async fn not_found_or_conflict(&self, id: i64) -> StoreError {
        match self.get_user(id).await {
            Ok(Some(_)) => {
                StoreError::InternalError(format!("User {} was modified concurrently", id))
            }
            Ok(None) => StoreError::NotFound(format!("User not found: {}", id)),
            Err(err) => err,
        }
    }
}

/// Index of the first transaction item whose condition failed, if the
/// transaction was cancelled for that reason.
fn failed_condition_index(err: &SdkError<TransactWriteItemsError>) -> Option<usize> {
    match err.as_service_error() {
        Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) => cancelled
            .cancellation_reasons()
            .iter()
            .position(|reason| reason.code() == Some(CONDITIONAL_CHECK_FAILED)),
        _ => None,
    }
}

fn is_conditional_check_failure(err: &SdkError<PutItemError>) -> bool {
    err.as_service_error()
        .map(|e| e.is_conditional_check_failed_exception())
        .unwrap_or(false)
}

#[async_trait]
impl UserStore for DynamoUserStore {
    async fn insert_user(&self, user: NewUserRecord) -> Result<UserRecord> {
        let id = self.next_id().await?;
        let record = user.into_record(id);

        let put_user = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(Self::user_item(&record)?))
            .condition_expression("attribute_not_exists(pk)")
            .build()?;

        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(put_user).build())
            .transact_items(self.claim_email(&record.email, id)?)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Inserted user {}", id);
                Ok(record)
            }
            Err(err) => match failed_condition_index(&err) {
                Some(1) => Err(StoreError::duplicate_email(&record.email)),
                _ => Err(map_dynamo_error("transact_write_items", err)),
            },
        }
    }

    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, Self::user_key(id))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| map_dynamo_error("get_item", e))?;

        match response.item() {
            Some(item) => Ok(Some(from_item(item.clone())?)),
            None => Ok(None),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, Self::email_key(email))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| map_dynamo_error("get_item", e))?;

        let owner = response
            .item()
            .and_then(|item| item.get(EMAIL_OWNER_ATTR))
            .and_then(|value| value.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok());

        match owner {
            Some(id) => self.get_user(id).await,
            None => Ok(None),
        }
    }

    async fn update_user(&self, user: UserRecord) -> Result<UserRecord> {
        let current = self
            .get_user(user.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("User not found: {}", user.id)))?;

        let item = Self::user_item(&user)?;

        if current.email == user.email {
            // The guard item is untouched, so a conditional put is enough
            let result = self
                .client
                .put_item()
                .table_name(&self.table_name)
                .set_item(Some(item))
                .condition_expression("attribute_exists(pk) AND email = :email")
                .expression_attribute_values(":email", AttributeValue::S(current.email.clone()))
                .send()
                .await;

            return match result {
                Ok(_) => Ok(user),
                Err(err) if is_conditional_check_failure(&err) => {
                    Err(self.not_found_or_conflict(user.id).await)
                }
                Err(err) => Err(map_dynamo_error("put_item", err)),
            };
        }

        let put_user = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_exists(pk) AND email = :email")
            .expression_attribute_values(":email", AttributeValue::S(current.email.clone()))
            .build()?;

        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(put_user).build())
            .transact_items(self.release_email(&current.email, user.id)?)
            .transact_items(self.claim_email(&user.email, user.id)?)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Updated user {} with a new email", user.id);
                Ok(user)
            }
            Err(err) => match failed_condition_index(&err) {
                Some(2) => Err(StoreError::duplicate_email(&user.email)),
                Some(_) => Err(self.not_found_or_conflict(user.id).await),
                None => Err(map_dynamo_error("transact_write_items", err)),
            },
        }
    }

    async fn delete_user(&self, id: i64) -> Result<bool> {
        let current = match self.get_user(id).await? {
            Some(user) => user,
            None => return Ok(false),
        };

        let delete_user = Delete::builder()
            .table_name(&self.table_name)
            .key(PARTITION_KEY, Self::user_key(id))
            .condition_expression("attribute_exists(pk)")
            .build()?;

        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().delete(delete_user).build())
            .transact_items(self.release_email(&current.email, id)?)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Deleted user {}", id);
                Ok(true)
            }
            Err(err) => match failed_condition_index(&err) {
                Some(_) => {
                    warn!("User {} changed while being deleted", id);
                    Ok(false)
                }
                None => Err(map_dynamo_error("transact_write_items", err)),
            },
        }
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = Vec::new();
        let mut start_key: Option<Item> = None;

        // Guard and counter items are filtered out by the key prefix
        loop {
            let response = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("begins_with(pk, :prefix)")
                .expression_attribute_values(":prefix", AttributeValue::S(USER_PREFIX.to_string()))
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| map_dynamo_error("scan", e))?;

            for item in response.items() {
                users.push(from_item(item.clone())?);
            }

            match response.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        users.sort_by_key(|user| user.id);
        Ok(users)
    }
}
