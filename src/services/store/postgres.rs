use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{ArchiveStore, PrimaryStore, PrimaryTx, StoreError, StoreResult};
use crate::models::{
    account::NewAccount, client::CreateClientData, user::CreateUserData, Account, AccountView,
    ArchivedAccount, Client, User,
};
use crate::services::account_query::{ListParams, Visibility};

const LISTING_FROM: &str = " FROM accounts a JOIN clients c ON c.id = a.client_id";

fn map_unique(error: sqlx::Error, what: &str) -> StoreError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(what.to_string())
        }
        _ => StoreError::Database(error),
    }
}

/// Primary database: accounts, clients, users
#[derive(Clone)]
pub struct PgPrimaryStore {
    pool: PgPool,
}

impl PgPrimaryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrimaryStore for PgPrimaryStore {
    async fn begin(&self) -> StoreResult<Box<dyn PrimaryTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPrimaryTx { tx }))
    }

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(Account::find_by_id(&self.pool, id).await?)
    }

    async fn find_account_by_numero(&self, numero: &str) -> StoreResult<Option<Account>> {
        Ok(Account::find_by_numero(&self.pool, numero).await?)
    }

    async fn list_accounts(
        &self,
        visibility: &Visibility,
        params: &ListParams,
    ) -> StoreResult<(Vec<AccountView>, i64)> {
        let mut select =
            QueryBuilder::<Postgres>::new("SELECT a.*, c.name AS holder_name");
        select.push(LISTING_FROM);
        params.push_where(visibility, &mut select);
        params.push_order(&mut select);
        select.push(" LIMIT ");
        select.push_bind(params.limit);
        select.push(" OFFSET ");
        select.push_bind(params.offset());

        let accounts = select
            .build_query_as::<AccountView>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*)");
        count.push(LISTING_FROM);
        params.push_where(visibility, &mut count);

        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        Ok((accounts, total))
    }

    async fn due_scheduled_blocks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Account>> {
        Ok(Account::find_due_scheduled_blocks(&self.pool, now, limit).await?)
    }

    async fn unarchived_terminal_accounts(
        &self,
        include_checking: bool,
        limit: i64,
    ) -> StoreResult<Vec<Account>> {
        Ok(Account::find_unarchived_terminal(&self.pool, include_checking, limit).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(User::find_by_email(&self.pool, email).await?)
    }

    async fn create_user(&self, data: CreateUserData) -> StoreResult<User> {
        User::create(&self.pool, &data)
            .await
            .map_err(|e| map_unique(e, "user email"))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgPrimaryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PrimaryTx for PgPrimaryTx {
    async fn lock_account(&mut self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(Account::lock_by_id(&mut *self.tx, id).await?)
    }

    async fn lock_account_by_numero(&mut self, numero: &str) -> StoreResult<Option<Account>> {
        Ok(Account::lock_by_numero(&mut *self.tx, numero).await?)
    }

    async fn find_client(&mut self, id: Uuid) -> StoreResult<Option<Client>> {
        Ok(Client::find_by_id(&mut *self.tx, id).await?)
    }

    async fn create_client(&mut self, data: &CreateClientData) -> StoreResult<Client> {
        Client::create(&mut *self.tx, data)
            .await
            .map_err(|e| map_unique(e, "client email"))
    }

    async fn insert_account(&mut self, data: &NewAccount) -> StoreResult<Option<Account>> {
        Ok(Account::create(&mut *self.tx, data).await?)
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<Account> {
        Account::save(&mut *self.tx, account)
            .await?
            .ok_or(StoreError::StaleVersion {
                id: account.id,
                expected: account.version,
            })
    }

    async fn recreate_account(&mut self, account: &Account) -> StoreResult<Account> {
        Account::recreate(&mut *self.tx, account)
            .await
            .map_err(|e| map_unique(e, "account"))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Archive database: archived account snapshots
#[derive(Clone)]
pub struct PgArchiveStore {
    pool: PgPool,
}

impl PgArchiveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArchiveStore for PgArchiveStore {
    async fn find(&self, id: Uuid) -> StoreResult<Option<ArchivedAccount>> {
        Ok(ArchivedAccount::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_numero(&self, numero: &str) -> StoreResult<Option<ArchivedAccount>> {
        Ok(ArchivedAccount::find_by_numero(&self.pool, numero).await?)
    }

    async fn find_conflicting(
        &self,
        id: Uuid,
        numero: &str,
    ) -> StoreResult<Option<ArchivedAccount>> {
        Ok(ArchivedAccount::find_conflicting(&self.pool, id, numero).await?)
    }

    async fn insert(&self, record: &ArchivedAccount) -> StoreResult<()> {
        ArchivedAccount::insert(&self.pool, record)
            .await
            .map_err(|e| map_unique(e, "archive record"))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(ArchivedAccount::delete(&self.pool, id).await?)
    }

    async fn due_unblocks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ArchivedAccount>> {
        Ok(ArchivedAccount::find_due_unblocks(&self.pool, now, limit).await?)
    }

    async fn list(&self, limit: i64, offset: i64) -> StoreResult<(Vec<ArchivedAccount>, i64)> {
        let records = ArchivedAccount::list(&self.pool, limit, offset).await?;
        let total = ArchivedAccount::count(&self.pool).await?;
        Ok((records, total))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
