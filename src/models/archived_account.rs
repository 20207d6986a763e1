use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgExecutor, FromRow};
use uuid::Uuid;

use super::account::{Account, AccountKind, AccountStatus};
use super::client::Client;

/// Point-in-time snapshot of an account held in the archive store.
///
/// Holder fields are copied at transfer time so the record stays readable
/// after the client's profile changes or disappears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedAccount {
    pub id: Uuid,
    pub numero: String,
    pub client_id: Uuid,
    pub kind: AccountKind,
    pub currency: String,
    pub balance: Decimal,
    pub status: AccountStatus,
    pub block_reason: Option<String>,
    pub block_start_date: Option<DateTime<Utc>>,
    pub block_end_date: Option<DateTime<Utc>>,
    pub version: i64,
    pub holder_name: Option<String>,
    pub holder_email: Option<String>,
    pub holder_phone: Option<String>,
    pub archive_reason: String,
    pub account_created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedAccount {
    pub fn snapshot(
        account: &Account,
        holder: Option<&Client>,
        archive_reason: &str,
        archived_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: account.id,
            numero: account.numero.clone(),
            client_id: account.client_id,
            kind: account.kind,
            currency: account.currency.clone(),
            balance: account.balance,
            status: account.status,
            block_reason: account.block_reason.clone(),
            block_start_date: account.block_start_date,
            block_end_date: account.block_end_date,
            version: account.version,
            holder_name: holder.map(|c| c.name.clone()),
            holder_email: holder.map(|c| c.email.clone()),
            holder_phone: holder.and_then(|c| c.phone.clone()),
            archive_reason: archive_reason.to_string(),
            account_created_at: account.created_at,
            archived_at,
        }
    }

    /// Rebuilds an active primary row from the snapshot, one version ahead
    pub fn to_active_account(&self, now: DateTime<Utc>) -> Account {
        Account {
            id: self.id,
            numero: self.numero.clone(),
            client_id: self.client_id,
            kind: self.kind,
            currency: self.currency.clone(),
            balance: self.balance,
            status: AccountStatus::Active,
            block_reason: None,
            scheduled_block: false,
            block_start_date: None,
            block_end_date: None,
            archived_at: None,
            version: self.version + 1,
            created_at: self.account_created_at,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        record: &ArchivedAccount,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO archived_accounts (
                id, numero, client_id, kind, currency, balance, status,
                block_reason, block_start_date, block_end_date, version,
                holder_name, holder_email, holder_phone, archive_reason,
                account_created_at, archived_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id)
        .bind(&record.numero)
        .bind(record.client_id)
        .bind(record.kind)
        .bind(&record.currency)
        .bind(record.balance)
        .bind(record.status)
        .bind(&record.block_reason)
        .bind(record.block_start_date)
        .bind(record.block_end_date)
        .bind(record.version)
        .bind(&record.holder_name)
        .bind(&record.holder_email)
        .bind(&record.holder_phone)
        .bind(&record.archive_reason)
        .bind(record.account_created_at)
        .bind(record.archived_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM archived_accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_numero<'e, E: PgExecutor<'e>>(
        executor: E,
        numero: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM archived_accounts WHERE numero = $1")
            .bind(numero)
            .fetch_optional(executor)
            .await
    }

    /// Any record that would collide with a new snapshot on id or number
    pub async fn find_conflicting<'e, E: PgExecutor<'e>>(
        executor: E,
        id: Uuid,
        numero: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM archived_accounts WHERE id = $1 OR numero = $2 LIMIT 1",
        )
        .bind(id)
        .bind(numero)
        .fetch_optional(executor)
        .await
    }

    /// Returns whether a record was removed
    pub async fn delete<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM archived_accounts WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Blocked snapshots whose block end date has been reached
    pub async fn find_due_unblocks<'e, E: PgExecutor<'e>>(
        executor: E,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM archived_accounts
            WHERE status = 'blocked'
              AND block_end_date IS NOT NULL
              AND block_end_date <= $1
            ORDER BY block_end_date ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    pub async fn list<'e, E: PgExecutor<'e>>(
        executor: E,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM archived_accounts
            ORDER BY archived_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
    }

    pub async fn count<'e, E: PgExecutor<'e>>(executor: E) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM archived_accounts")
            .fetch_one(executor)
            .await
    }
}
