use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgExecutor, FromRow};
use std::fmt;
use uuid::Uuid;

/// Prefix of every generated account number
pub const NUMERO_PREFIX: &str = "CP";
const NUMERO_DIGITS: u64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Checking,
    Savings,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Checking => "checking",
            AccountKind::Savings => "savings",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Blocked,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Blocked => "blocked",
            AccountStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bank account row in the primary store.
///
/// Rows are never hard-deleted: `deleted_at` marks a soft delete and
/// `archived_at` marks that the authoritative copy now lives in the archive
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub numero: String,
    pub client_id: Uuid,
    pub kind: AccountKind,
    pub currency: String,
    pub balance: Decimal,
    pub status: AccountStatus,
    pub block_reason: Option<String>,
    pub scheduled_block: bool,
    pub block_start_date: Option<DateTime<Utc>>,
    pub block_end_date: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Account joined with its holder's display name, as returned by listings
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub account: Account,
    pub holder_name: String,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub numero: String,
    pub client_id: Uuid,
    pub kind: AccountKind,
    pub currency: String,
    pub balance: Decimal,
}

impl Account {
    /// Neither soft-deleted nor moved to the archive store
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none() && self.archived_at.is_none()
    }

    /// Clears every block-related field and reactivates the account in place
    pub fn clear_block(&mut self) {
        self.status = AccountStatus::Active;
        self.block_reason = None;
        self.scheduled_block = false;
        self.block_start_date = None;
        self.block_end_date = None;
    }

    /// Inserts a new account. Returns `None` when the account number is taken.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        data: &NewAccount,
    ) -> Result<Option<Self>, sqlx::Error> {
        let account = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO accounts (id, numero, client_id, kind, currency, balance)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (numero) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(data.id)
        .bind(&data.numero)
        .bind(data.client_id)
        .bind(data.kind)
        .bind(&data.currency)
        .bind(data.balance)
        .fetch_optional(executor)
        .await?;

        Ok(account)
    }

    /// Re-inserts an account from an archived snapshot, keeping its id and number
    pub async fn recreate<'e, E: PgExecutor<'e>>(
        executor: E,
        account: &Account,
    ) -> Result<Self, sqlx::Error> {
        let account = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO accounts (
                id, numero, client_id, kind, currency, balance, status,
                block_reason, scheduled_block, block_start_date, block_end_date,
                archived_at, version, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), $15)
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(&account.numero)
        .bind(account.client_id)
        .bind(account.kind)
        .bind(&account.currency)
        .bind(account.balance)
        .bind(account.status)
        .bind(&account.block_reason)
        .bind(account.scheduled_block)
        .bind(account.block_start_date)
        .bind(account.block_end_date)
        .bind(account.archived_at)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.deleted_at)
        .fetch_one(executor)
        .await?;

        Ok(account)
    }

    /// Finds an account by id, soft-deleted rows included
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Finds an account by number, soft-deleted rows included
    pub async fn find_by_numero<'e, E: PgExecutor<'e>>(
        executor: E,
        numero: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM accounts WHERE numero = $1")
            .bind(numero)
            .fetch_optional(executor)
            .await
    }

    /// Same as `find_by_id` but takes a row lock until the transaction ends
    pub async fn lock_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn lock_by_numero<'e, E: PgExecutor<'e>>(
        executor: E,
        numero: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM accounts WHERE numero = $1 FOR UPDATE")
            .bind(numero)
            .fetch_optional(executor)
            .await
    }

    /// Writes every mutable column and bumps `version` by one.
    ///
    /// The write only applies when the stored version still equals
    /// `account.version`; `None` means another writer got there first.
    pub async fn save<'e, E: PgExecutor<'e>>(
        executor: E,
        account: &Account,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            UPDATE accounts
            SET
                currency = $3,
                status = $4,
                block_reason = $5,
                scheduled_block = $6,
                block_start_date = $7,
                block_end_date = $8,
                archived_at = $9,
                deleted_at = $10,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(account.id)
        .bind(account.version)
        .bind(&account.currency)
        .bind(account.status)
        .bind(&account.block_reason)
        .bind(account.scheduled_block)
        .bind(account.block_start_date)
        .bind(account.block_end_date)
        .bind(account.archived_at)
        .bind(account.deleted_at)
        .fetch_optional(executor)
        .await
    }

    /// Scheduled blocks whose start date has been reached
    pub async fn find_due_scheduled_blocks<'e, E: PgExecutor<'e>>(
        executor: E,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM accounts
            WHERE scheduled_block = TRUE
              AND block_start_date <= $1
              AND deleted_at IS NULL
            ORDER BY block_start_date ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Live rows that are blocked or closed but were never moved to the archive
    pub async fn find_unarchived_terminal<'e, E: PgExecutor<'e>>(
        executor: E,
        include_checking: bool,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM accounts
            WHERE status IN ('blocked', 'closed')
              AND archived_at IS NULL
              AND deleted_at IS NULL
              AND (kind = 'savings' OR $1)
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(include_checking)
        .bind(limit)
        .fetch_all(executor)
        .await
    }
}

/// Generates a human-facing account number such as `CP0042137765`
pub fn generate_numero() -> Result<String, ring::error::Unspecified> {
    let mut bytes = [0u8; 8];
    SystemRandom::new().fill(&mut bytes)?;
    let value = u64::from_be_bytes(bytes) % NUMERO_DIGITS;

    Ok(format!("{}{:010}", NUMERO_PREFIX, value))
}
