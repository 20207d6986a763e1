//! Store seams between the lifecycle engine and the two databases.
//!
//! The primary store is transactional: every lifecycle transition runs inside
//! one `PrimaryTx` that holds the account's row lock until commit. The archive
//! store is a separate database with only single-statement atomicity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    account::NewAccount, client::CreateClientData, user::CreateUserData, Account, AccountView,
    ArchivedAccount, Client, User,
};
use crate::services::account_query::{ListParams, Visibility};

#[cfg(test)]
pub mod memory;
pub mod postgres;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Account {id} was modified concurrently (expected version {expected})")]
    StaleVersion { id: Uuid, expected: i64 },

    #[error("Duplicate {0}")]
    Duplicate(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait PrimaryStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn PrimaryTx>>;

    /// Finds an account by id, soft-deleted rows included
    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>>;

    async fn find_account_by_numero(&self, numero: &str) -> StoreResult<Option<Account>>;

    /// One page of accounts matching `visibility` and `params`, plus the total count
    async fn list_accounts(
        &self,
        visibility: &Visibility,
        params: &ListParams,
    ) -> StoreResult<(Vec<AccountView>, i64)>;

    async fn due_scheduled_blocks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Account>>;

    async fn unarchived_terminal_accounts(
        &self,
        include_checking: bool,
        limit: i64,
    ) -> StoreResult<Vec<Account>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn create_user(&self, data: CreateUserData) -> StoreResult<User>;

    async fn ping(&self) -> StoreResult<()>;
}

/// An open primary-store transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait PrimaryTx: Send {
    /// Reads and row-locks an account, soft-deleted rows included
    async fn lock_account(&mut self, id: Uuid) -> StoreResult<Option<Account>>;

    async fn lock_account_by_numero(&mut self, numero: &str) -> StoreResult<Option<Account>>;

    async fn find_client(&mut self, id: Uuid) -> StoreResult<Option<Client>>;

    async fn create_client(&mut self, data: &CreateClientData) -> StoreResult<Client>;

    /// `None` when the account number is already taken
    async fn insert_account(&mut self, data: &NewAccount) -> StoreResult<Option<Account>>;

    /// Persists the mutable fields of `account` if its version is current;
    /// the returned row carries `version + 1`
    async fn save_account(&mut self, account: &Account) -> StoreResult<Account>;

    /// Inserts a full row, used when restoring an account whose primary row is gone
    async fn recreate_account(&mut self, account: &Account) -> StoreResult<Account>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn find(&self, id: Uuid) -> StoreResult<Option<ArchivedAccount>>;

    async fn find_by_numero(&self, numero: &str) -> StoreResult<Option<ArchivedAccount>>;

    /// Any record sharing the id or the account number
    async fn find_conflicting(
        &self,
        id: Uuid,
        numero: &str,
    ) -> StoreResult<Option<ArchivedAccount>>;

    async fn insert(&self, record: &ArchivedAccount) -> StoreResult<()>;

    /// Returns whether a record was removed
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;

    async fn due_unblocks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ArchivedAccount>>;

    async fn list(&self, limit: i64, offset: i64) -> StoreResult<(Vec<ArchivedAccount>, i64)>;

    async fn ping(&self) -> StoreResult<()>;
}
