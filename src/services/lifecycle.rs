use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    account::{generate_numero, NewAccount},
    client::CreateClientData,
    Account, AccountKind, AccountStatus, ArchivedAccount,
};
use crate::services::archive_transfer;
use crate::services::store::{ArchiveStore, PrimaryStore, PrimaryTx, StoreError};

pub const MANUAL_CLOSURE_REASON: &str = "manual closure";
const SCHEDULED_BLOCK_REASON: &str = "scheduled block";
const NUMERO_ATTEMPTS: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("Account {0} has been archived")]
    Archived(String),

    #[error("Archive transfer failed: {0}")]
    TransferFailure(String),

    #[error("Inconsistent state for account {account_id}: {detail}")]
    InconsistentState { account_id: Uuid, detail: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::StaleVersion { .. } | StoreError::Duplicate(_) => {
                LifecycleError::Conflict(error.to_string())
            }
            other => LifecycleError::Store(other),
        }
    }
}

impl LifecycleError {
    fn archive_read(error: StoreError) -> Self {
        LifecycleError::TransferFailure(format!("archive store read failed: {}", error))
    }
}

/// Which store holds the authoritative copy after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreLocation {
    Primary,
    Archive,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub account: Account,
    pub location: StoreLocation,
}

/// Result of a background transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Applied,
    /// The account no longer qualifies, usually because another run handled it
    Skipped,
}

#[derive(Debug, Clone)]
pub enum AccountLookup {
    Live(Account),
    Archived(ArchivedAccount),
}

/// Decides which blocked or closed rows must live in the archive store.
///
/// Savings accounts are always archived; checking accounts only when
/// `archive_checking_accounts` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchivePolicy {
    pub archive_checking_accounts: bool,
}

impl ArchivePolicy {
    pub fn requires_archive(&self, account: &Account) -> bool {
        matches!(account.status, AccountStatus::Blocked | AccountStatus::Closed)
            && (account.kind == AccountKind::Savings || self.archive_checking_accounts)
    }
}

#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub reason: String,
    /// Defaults to today, which blocks immediately
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct UnblockRequest {
    pub reason: Option<String>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum AccountHolder {
    Existing(Uuid),
    New(CreateClientData),
}

#[derive(Debug, Clone)]
pub struct CreateAccountRequest {
    pub holder: AccountHolder,
    pub kind: AccountKind,
    pub currency: String,
    pub initial_balance: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAccountRequest {
    pub currency: Option<String>,
    pub expected_version: Option<i64>,
}

/// State machine for account status and archival.
///
/// Every transition locks the primary row first, re-checks its preconditions
/// under that lock and only then mutates, so concurrent requests and
/// overlapping scheduler runs on the same account are serialized.
pub struct LifecycleEngine {
    primary: Arc<dyn PrimaryStore>,
    archive: Arc<dyn ArchiveStore>,
    policy: ArchivePolicy,
}

impl LifecycleEngine {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        archive: Arc<dyn ArchiveStore>,
        policy: ArchivePolicy,
    ) -> Self {
        Self {
            primary,
            archive,
            policy,
        }
    }

    pub fn primary(&self) -> &dyn PrimaryStore {
        self.primary.as_ref()
    }

    pub fn archive(&self) -> &dyn ArchiveStore {
        self.archive.as_ref()
    }

    pub fn policy(&self) -> ArchivePolicy {
        self.policy
    }

    /// Opens a new active account with a freshly generated number
    #[tracing::instrument(skip(self, request), fields(kind = %request.kind))]
    pub async fn create(&self, request: CreateAccountRequest) -> Result<Account, LifecycleError> {
        let currency = normalize_currency(&request.currency)?;
        let balance = request.initial_balance.unwrap_or(Decimal::ZERO);
        if balance.is_sign_negative() {
            return Err(LifecycleError::Validation(
                "Initial balance cannot be negative".to_string(),
            ));
        }
        if let AccountHolder::New(data) = &request.holder {
            if data.name.trim().is_empty() || data.email.trim().is_empty() {
                return Err(LifecycleError::Validation(
                    "Client name and email are required".to_string(),
                ));
            }
        }

        let mut tx = self.primary.begin().await?;

        let client = match &request.holder {
            AccountHolder::Existing(client_id) => tx
                .find_client(*client_id)
                .await?
                .ok_or_else(|| LifecycleError::NotFound(format!("Client {} not found", client_id)))?,
            AccountHolder::New(data) => tx.create_client(data).await?,
        };

        for attempt in 1..=NUMERO_ATTEMPTS {
            let numero = generate_numero()
                .map_err(|_| LifecycleError::Internal("random source unavailable".to_string()))?;

            let data = NewAccount {
                id: Uuid::new_v4(),
                numero,
                client_id: client.id,
                kind: request.kind,
                currency: currency.clone(),
                balance,
            };

            if let Some(account) = tx.insert_account(&data).await? {
                tx.commit().await?;
                info!(
                    account_id = %account.id,
                    numero = %account.numero,
                    client_id = %client.id,
                    "Account created"
                );
                return Ok(account);
            }

            debug!(attempt, "Account number already taken, retrying");
        }

        Err(LifecycleError::Conflict(
            "Could not allocate a unique account number".to_string(),
        ))
    }

    /// In-place update of a live account
    #[tracing::instrument(skip(self, request), fields(account_id = %id))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateAccountRequest,
    ) -> Result<Account, LifecycleError> {
        let currency = request
            .currency
            .as_deref()
            .map(normalize_currency)
            .transpose()?;

        let mut tx = self.primary.begin().await?;
        let account = tx.lock_account(id).await?.ok_or_else(|| not_found(id))?;

        if !account.is_live() {
            return Err(LifecycleError::Archived(account.numero));
        }
        check_version(&account, request.expected_version)?;

        let mut next = account;
        if let Some(currency) = currency {
            next.currency = currency;
        }

        let saved = tx.save_account(&next).await?;
        tx.commit().await?;

        info!(numero = %saved.numero, version = saved.version, "Account updated");
        Ok(saved)
    }

    /// Looks an account up by id or number, primary store first
    pub async fn find(&self, key: &str) -> Result<AccountLookup, LifecycleError> {
        let parsed = Uuid::parse_str(key).ok();

        let primary = match parsed {
            Some(id) => self.primary.find_account(id).await?,
            None => self.primary.find_account_by_numero(key).await?,
        };
        if let Some(account) = primary.filter(Account::is_live) {
            return Ok(AccountLookup::Live(account));
        }

        let archived = match parsed {
            Some(id) => self.archive.find(id).await,
            None => self.archive.find_by_numero(key).await,
        }
        .map_err(LifecycleError::archive_read)?;

        archived
            .map(AccountLookup::Archived)
            .ok_or_else(|| LifecycleError::NotFound(format!("Account {} not found", key)))
    }

    pub async fn block(
        &self,
        id: Uuid,
        request: BlockRequest,
    ) -> Result<Transition, LifecycleError> {
        self.block_at(id, request, Utc::now()).await
    }

    /// Blocks a savings account.
    ///
    /// A start date of today blocks immediately and moves the account to the
    /// archive store. A later start date only schedules the block; the
    /// scheduler activates it once the date is reached.
    #[tracing::instrument(skip(self, request, now), fields(account_id = %id))]
    pub async fn block_at(
        &self,
        id: Uuid,
        request: BlockRequest,
        now: DateTime<Utc>,
    ) -> Result<Transition, LifecycleError> {
        let reason = required_reason(&request.reason)?;
        let today = now.date_naive();
        let start_day = request.start_date.unwrap_or(today);

        if start_day < today {
            return Err(LifecycleError::Validation(
                "Block start date cannot be in the past".to_string(),
            ));
        }
        if request.end_date.is_some_and(|end| end <= start_day) {
            return Err(LifecycleError::Validation(
                "Block end date must be after the start date".to_string(),
            ));
        }

        let mut tx = self.primary.begin().await?;
        let account = tx.lock_account(id).await?.ok_or_else(|| not_found(id))?;

        if account.kind != AccountKind::Savings {
            return Err(LifecycleError::InvalidOperation(format!(
                "Only savings accounts can be blocked, {} is a {} account",
                account.numero, account.kind
            )));
        }
        if account.status == AccountStatus::Blocked {
            return Err(LifecycleError::Conflict(format!(
                "Account {} is already blocked",
                account.numero
            )));
        }
        if account.scheduled_block {
            return Err(LifecycleError::Conflict(format!(
                "Account {} already has a scheduled block",
                account.numero
            )));
        }
        if !account.is_live() {
            return Err(LifecycleError::Conflict(format!(
                "Account {} is archived",
                account.numero
            )));
        }
        if account.status != AccountStatus::Active {
            return Err(LifecycleError::InvalidOperation(format!(
                "Account {} is {}, only active accounts can be blocked",
                account.numero, account.status
            )));
        }
        check_version(&account, request.expected_version)?;

        let mut next = account;
        next.block_reason = Some(reason.clone());
        next.block_end_date = request.end_date.map(start_of_day);

        if start_day > today {
            next.scheduled_block = true;
            next.block_start_date = Some(start_of_day(start_day));

            let saved = tx.save_account(&next).await?;
            tx.commit().await?;

            info!(
                numero = %saved.numero,
                block_start = ?saved.block_start_date,
                block_end = ?saved.block_end_date,
                "Block scheduled"
            );

            return Ok(Transition {
                account: saved,
                location: StoreLocation::Primary,
            });
        }

        next.status = AccountStatus::Blocked;
        next.block_start_date = Some(now);
        next.archived_at = Some(now);
        next.deleted_at = Some(now);

        let saved = self.archive_staged(tx, &next, &reason, now).await?;

        info!(numero = %saved.numero, reason = %reason, "Account blocked");

        Ok(Transition {
            account: saved,
            location: StoreLocation::Archive,
        })
    }

    pub async fn unblock(
        &self,
        id: Uuid,
        request: UnblockRequest,
    ) -> Result<Transition, LifecycleError> {
        self.unblock_at(id, request, Utc::now()).await
    }

    /// Lifts a block or cancels a scheduled one.
    ///
    /// An archived account is restored to the primary store and its archive
    /// record removed; a scheduled block only has its fields cleared.
    #[tracing::instrument(skip(self, request, now), fields(account_id = %id))]
    pub async fn unblock_at(
        &self,
        id: Uuid,
        request: UnblockRequest,
        now: DateTime<Utc>,
    ) -> Result<Transition, LifecycleError> {
        let mut tx = self.primary.begin().await?;
        let existing = tx.lock_account(id).await?;

        let restored = match existing {
            None => {
                let record = self
                    .archive
                    .find(id)
                    .await
                    .map_err(LifecycleError::archive_read)?
                    .ok_or_else(|| not_found(id))?;

                if record.status != AccountStatus::Blocked {
                    return Err(not_blocked(&record.numero));
                }
                check_version_value(record.version, request.expected_version)?;

                self.reactivate_from_archive(tx, None, record, now).await?
            }
            Some(account) if account.scheduled_block => {
                check_version(&account, request.expected_version)?;

                let mut next = account;
                next.clear_block();
                let saved = tx.save_account(&next).await?;
                tx.commit().await?;
                saved
            }
            Some(account) if account.status == AccountStatus::Blocked => {
                check_version(&account, request.expected_version)?;

                let record = if account.is_live() {
                    None
                } else {
                    self.archive
                        .find(id)
                        .await
                        .map_err(LifecycleError::archive_read)?
                };

                match record {
                    Some(record) => {
                        self.reactivate_from_archive(tx, Some(account), record, now)
                            .await?
                    }
                    None => {
                        warn!(
                            numero = %account.numero,
                            "Blocked account has no archive record, reactivating in place"
                        );
                        let mut next = account;
                        next.clear_block();
                        next.archived_at = None;
                        next.deleted_at = None;
                        let saved = tx.save_account(&next).await?;
                        tx.commit().await?;
                        saved
                    }
                }
            }
            Some(account) => return Err(not_blocked(&account.numero)),
        };

        info!(
            numero = %restored.numero,
            reason = ?request.reason,
            version = restored.version,
            "Account unblocked"
        );

        Ok(Transition {
            account: restored,
            location: StoreLocation::Primary,
        })
    }

    pub async fn delete_and_archive(
        &self,
        numero: &str,
        expected_version: Option<i64>,
    ) -> Result<Transition, LifecycleError> {
        self.delete_and_archive_at(numero, expected_version, Utc::now())
            .await
    }

    /// Closes an account and moves it to the archive store
    #[tracing::instrument(skip(self, now))]
    pub async fn delete_and_archive_at(
        &self,
        numero: &str,
        expected_version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Transition, LifecycleError> {
        let mut tx = self.primary.begin().await?;
        let account = tx
            .lock_account_by_numero(numero)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("Account {} not found", numero)))?;

        if account.kind == AccountKind::Checking {
            return Err(LifecycleError::InvalidOperation(format!(
                "Checking account {} cannot be closed",
                account.numero
            )));
        }
        if account.status == AccountStatus::Blocked {
            return Err(LifecycleError::InvalidOperation(format!(
                "Account {} is blocked, unblock it before closing",
                account.numero
            )));
        }
        if account.scheduled_block {
            return Err(LifecycleError::Conflict(format!(
                "Account {} has a pending scheduled block",
                account.numero
            )));
        }
        if !account.is_live() {
            return Err(LifecycleError::Conflict(format!(
                "Account {} is already archived",
                account.numero
            )));
        }
        check_version(&account, expected_version)?;

        let mut next = account;
        next.status = AccountStatus::Closed;
        next.archived_at = Some(now);
        next.deleted_at = Some(now);

        let saved = self
            .archive_staged(tx, &next, MANUAL_CLOSURE_REASON, now)
            .await?;

        info!(numero = %saved.numero, "Account closed and archived");

        Ok(Transition {
            account: saved,
            location: StoreLocation::Archive,
        })
    }

    pub async fn restore(&self, id: Uuid) -> Result<Transition, LifecycleError> {
        self.restore_at(id, Utc::now()).await
    }

    /// Brings an archived account back to the primary store as active.
    ///
    /// A soft-deleted primary row is restored in place so that columns not
    /// mirrored in the archive survive; a missing row is rebuilt from the
    /// snapshot.
    #[tracing::instrument(skip(self, now), fields(account_id = %id))]
    pub async fn restore_at(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transition, LifecycleError> {
        let mut tx = self.primary.begin().await?;
        let existing = tx.lock_account(id).await?;

        let record = self
            .archive
            .find(id)
            .await
            .map_err(LifecycleError::archive_read)?
            .ok_or_else(|| {
                LifecycleError::NotFound(format!("No archive record for account {}", id))
            })?;

        if let Some(account) = existing.as_ref().filter(|a| a.is_live()) {
            return Err(LifecycleError::Conflict(format!(
                "Account {} is already live in the primary store",
                account.numero
            )));
        }

        let restored = self
            .reactivate_from_archive(tx, existing, record, now)
            .await?;

        info!(numero = %restored.numero, "Account restored");

        Ok(Transition {
            account: restored,
            location: StoreLocation::Primary,
        })
    }

    /// Turns a due scheduled block into an immediate one
    #[tracing::instrument(skip(self, now), fields(account_id = %id))]
    pub async fn activate_scheduled_block(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, LifecycleError> {
        let mut tx = self.primary.begin().await?;
        let Some(account) = tx.lock_account(id).await? else {
            return Ok(ScanOutcome::Skipped);
        };

        let due = account.scheduled_block
            && account.is_live()
            && account.block_start_date.is_some_and(|start| start <= now);
        if !due {
            debug!(numero = %account.numero, "Scheduled block no longer due");
            return Ok(ScanOutcome::Skipped);
        }

        let reason = account
            .block_reason
            .clone()
            .unwrap_or_else(|| SCHEDULED_BLOCK_REASON.to_string());

        let mut next = account;
        next.status = AccountStatus::Blocked;
        next.scheduled_block = false;
        next.archived_at = Some(now);
        next.deleted_at = Some(now);

        let saved = self.archive_staged(tx, &next, &reason, now).await?;
        info!(numero = %saved.numero, "Scheduled block activated");

        Ok(ScanOutcome::Applied)
    }

    /// Unblocks an archived account whose block end date has passed
    #[tracing::instrument(skip(self, now), fields(account_id = %id))]
    pub async fn expire_block(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, LifecycleError> {
        let mut tx = self.primary.begin().await?;
        let existing = tx.lock_account(id).await?;

        let Some(record) = self
            .archive
            .find(id)
            .await
            .map_err(LifecycleError::archive_read)?
        else {
            return Ok(ScanOutcome::Skipped);
        };

        let due = record.status == AccountStatus::Blocked
            && record.block_end_date.is_some_and(|end| end <= now);
        if !due {
            return Ok(ScanOutcome::Skipped);
        }
        if let Some(account) = existing.as_ref().filter(|a| a.is_live()) {
            warn!(
                numero = %account.numero,
                "Account is live in both stores, leaving it for manual reconciliation"
            );
            return Ok(ScanOutcome::Skipped);
        }

        let restored = self
            .reactivate_from_archive(tx, existing, record, now)
            .await?;
        info!(numero = %restored.numero, "Block expired, account reactivated");

        Ok(ScanOutcome::Applied)
    }

    /// Archives a live blocked or closed row that never reached the archive store
    #[tracing::instrument(skip(self, now), fields(account_id = %id))]
    pub async fn archive_unarchived(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, LifecycleError> {
        let mut tx = self.primary.begin().await?;
        let Some(account) = tx.lock_account(id).await? else {
            return Ok(ScanOutcome::Skipped);
        };

        if !account.is_live() || !self.policy.requires_archive(&account) {
            return Ok(ScanOutcome::Skipped);
        }

        let reason = match account.status {
            AccountStatus::Closed => MANUAL_CLOSURE_REASON.to_string(),
            _ => account
                .block_reason
                .clone()
                .unwrap_or_else(|| account.status.to_string()),
        };

        let mut next = account;
        next.archived_at = Some(now);
        next.deleted_at = Some(now);

        let saved = self.archive_staged(tx, &next, &reason, now).await?;
        info!(numero = %saved.numero, status = %saved.status, "Unarchived account swept to archive");

        Ok(ScanOutcome::Applied)
    }

    /// Saves `next` inside `tx` and transfers the result to the archive store
    async fn archive_staged(
        &self,
        mut tx: Box<dyn PrimaryTx>,
        next: &Account,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, LifecycleError> {
        let saved = tx.save_account(next).await?;
        let holder = tx.find_client(saved.client_id).await?;
        let snapshot = ArchivedAccount::snapshot(&saved, holder.as_ref(), reason, now);

        archive_transfer::transfer_to_archive(tx, self.archive.as_ref(), &snapshot).await?;

        Ok(saved)
    }

    async fn reactivate_from_archive(
        &self,
        mut tx: Box<dyn PrimaryTx>,
        existing: Option<Account>,
        record: ArchivedAccount,
        now: DateTime<Utc>,
    ) -> Result<Account, LifecycleError> {
        let restored = match existing {
            Some(account) => {
                let mut next = account;
                next.clear_block();
                next.archived_at = None;
                next.deleted_at = None;
                tx.save_account(&next).await?
            }
            None => {
                debug!(numero = %record.numero, "No primary row left, recreating from snapshot");
                tx.recreate_account(&record.to_active_account(now)).await?
            }
        };

        archive_transfer::transfer_from_archive(tx, self.archive.as_ref(), &record).await?;

        Ok(restored)
    }
}

fn not_found(id: Uuid) -> LifecycleError {
    LifecycleError::NotFound(format!("Account {} not found", id))
}

fn not_blocked(numero: &str) -> LifecycleError {
    LifecycleError::Conflict(format!(
        "Account {} is neither blocked nor scheduled for blocking",
        numero
    ))
}

fn check_version(account: &Account, expected: Option<i64>) -> Result<(), LifecycleError> {
    check_version_value(account.version, expected)
}

fn check_version_value(current: i64, expected: Option<i64>) -> Result<(), LifecycleError> {
    match expected {
        Some(expected) if expected != current => Err(LifecycleError::Conflict(format!(
            "Version mismatch: expected {}, current is {}",
            expected, current
        ))),
        _ => Ok(()),
    }
}

fn required_reason(reason: &str) -> Result<String, LifecycleError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LifecycleError::Validation(
            "A block reason is required".to_string(),
        ));
    }
    Ok(reason.to_string())
}

/// ISO 4217 style: three ASCII letters, stored uppercase
fn normalize_currency(currency: &str) -> Result<String, LifecycleError> {
    let currency = currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(LifecycleError::Validation(format!(
            "Invalid currency code: {}",
            currency
        )));
    }
    Ok(currency.to_ascii_uppercase())
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
