//! In-memory stores for unit tests, with fault injection on commits and
//! archive writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{ArchiveStore, PrimaryStore, PrimaryTx, StoreError, StoreResult};
use crate::models::{
    account::NewAccount, client::CreateClientData, user::CreateUserData, Account, AccountKind,
    AccountStatus, AccountView, ArchivedAccount, Client, User,
};
use crate::services::account_query::{ListParams, SortField, SortOrder, Visibility};

#[derive(Debug, Clone, Default)]
struct PrimaryState {
    accounts: HashMap<Uuid, Account>,
    clients: HashMap<Uuid, Client>,
    users: HashMap<Uuid, User>,
}

#[derive(Clone, Default)]
pub struct MemoryPrimaryStore {
    state: Arc<Mutex<PrimaryState>>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryPrimaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub async fn seed_client(&self, name: &str) -> Client {
        let now = Utc::now();
        let client = Client {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            phone: Some("+221770000000".to_string()),
            created_at: now,
            updated_at: now,
        };
        self.state
            .lock()
            .await
            .clients
            .insert(client.id, client.clone());
        client
    }

    pub async fn seed_account(
        &self,
        client_id: Uuid,
        numero: &str,
        kind: AccountKind,
        status: AccountStatus,
    ) -> Account {
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            numero: numero.to_string(),
            client_id,
            kind,
            currency: "XOF".to_string(),
            balance: Decimal::new(150_000, 2),
            status,
            block_reason: None,
            scheduled_block: false,
            block_start_date: None,
            block_end_date: None,
            archived_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.put_account(account.clone()).await;
        account
    }

    pub async fn put_account(&self, account: Account) {
        self.state
            .lock()
            .await
            .accounts
            .insert(account.id, account);
    }

    pub async fn remove_account(&self, id: Uuid) {
        self.state.lock().await.accounts.remove(&id);
    }

    pub async fn account(&self, id: Uuid) -> Option<Account> {
        self.state.lock().await.accounts.get(&id).cloned()
    }

    pub async fn seed_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    async fn begin(&self) -> StoreResult<Box<dyn PrimaryTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryPrimaryTx {
            guard,
            staged,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        }))
    }

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.account(id).await)
    }

    async fn find_account_by_numero(&self, numero: &str) -> StoreResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.numero == numero)
            .cloned())
    }

    async fn list_accounts(
        &self,
        visibility: &Visibility,
        params: &ListParams,
    ) -> StoreResult<(Vec<AccountView>, i64)> {
        let state = self.state.lock().await;
        let mut views: Vec<AccountView> = state
            .accounts
            .values()
            .filter(|a| visibility.matches(a))
            .map(|a| AccountView {
                account: a.clone(),
                holder_name: state
                    .clients
                    .get(&a.client_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default(),
            })
            .filter(|v| params.matches(v))
            .collect();

        views.sort_by_key(|v| match params.sort {
            SortField::CreatedAt => v.account.created_at,
            SortField::UpdatedAt => v.account.updated_at,
        });
        if params.order == SortOrder::Desc {
            views.reverse();
        }

        let total = views.len() as i64;
        let page = views
            .into_iter()
            .skip(params.offset() as usize)
            .take(params.limit as usize)
            .collect();

        Ok((page, total))
    }

    async fn due_scheduled_blocks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .filter(|a| {
                a.scheduled_block
                    && a.deleted_at.is_none()
                    && a.block_start_date.is_some_and(|start| start <= now)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn unarchived_terminal_accounts(
        &self,
        include_checking: bool,
        limit: i64,
    ) -> StoreResult<Vec<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .filter(|a| {
                a.is_live()
                    && matches!(a.status, AccountStatus::Blocked | AccountStatus::Closed)
                    && (a.kind == AccountKind::Savings || include_checking)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_user(&self, data: CreateUserData) -> StoreResult<User> {
        let mut state = self.state.lock().await;
        if state
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&data.email))
        {
            return Err(StoreError::Duplicate("user email".to_string()));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: data.email,
            password_hash: data.password_hash,
            role: data.role,
            client_id: data.client_id,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Holds the whole store lock for its lifetime, which serializes transactions
pub struct MemoryPrimaryTx {
    guard: OwnedMutexGuard<PrimaryState>,
    staged: PrimaryState,
    fail_commit: bool,
}

#[async_trait]
impl PrimaryTx for MemoryPrimaryTx {
    async fn lock_account(&mut self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.staged.accounts.get(&id).cloned())
    }

    async fn lock_account_by_numero(&mut self, numero: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .staged
            .accounts
            .values()
            .find(|a| a.numero == numero)
            .cloned())
    }

    async fn find_client(&mut self, id: Uuid) -> StoreResult<Option<Client>> {
        Ok(self.staged.clients.get(&id).cloned())
    }

    async fn create_client(&mut self, data: &CreateClientData) -> StoreResult<Client> {
        if self
            .staged
            .clients
            .values()
            .any(|c| c.email.eq_ignore_ascii_case(&data.email))
        {
            return Err(StoreError::Duplicate("client email".to_string()));
        }
        let now = Utc::now();
        let client = Client {
            id: Uuid::new_v4(),
            name: data.name.clone(),
            email: data.email.clone(),
            phone: data.phone.clone(),
            created_at: now,
            updated_at: now,
        };
        self.staged.clients.insert(client.id, client.clone());
        Ok(client)
    }

    async fn insert_account(&mut self, data: &NewAccount) -> StoreResult<Option<Account>> {
        if self
            .staged
            .accounts
            .values()
            .any(|a| a.numero == data.numero)
        {
            return Ok(None);
        }
        let now = Utc::now();
        let account = Account {
            id: data.id,
            numero: data.numero.clone(),
            client_id: data.client_id,
            kind: data.kind,
            currency: data.currency.clone(),
            balance: data.balance,
            status: AccountStatus::Active,
            block_reason: None,
            scheduled_block: false,
            block_start_date: None,
            block_end_date: None,
            archived_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.staged.accounts.insert(account.id, account.clone());
        Ok(Some(account))
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<Account> {
        let current = self
            .staged
            .accounts
            .get(&account.id)
            .filter(|stored| stored.version == account.version)
            .ok_or(StoreError::StaleVersion {
                id: account.id,
                expected: account.version,
            })?;

        let mut saved = current.clone();
        saved.currency = account.currency.clone();
        saved.status = account.status;
        saved.block_reason = account.block_reason.clone();
        saved.scheduled_block = account.scheduled_block;
        saved.block_start_date = account.block_start_date;
        saved.block_end_date = account.block_end_date;
        saved.archived_at = account.archived_at;
        saved.deleted_at = account.deleted_at;
        saved.version += 1;
        saved.updated_at = Utc::now();

        self.staged.accounts.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn recreate_account(&mut self, account: &Account) -> StoreResult<Account> {
        if self.staged.accounts.contains_key(&account.id)
            || self
                .staged
                .accounts
                .values()
                .any(|a| a.numero == account.numero)
        {
            return Err(StoreError::Duplicate("account".to_string()));
        }
        self.staged.accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryPrimaryTx {
            mut guard,
            staged,
            fail_commit,
        } = *self;
        if fail_commit {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryArchiveStore {
    records: Arc<Mutex<HashMap<Uuid, ArchivedAccount>>>,
    fail_inserts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn record(&self, id: Uuid) -> Option<ArchivedAccount> {
        self.records.lock().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn find(&self, id: Uuid) -> StoreResult<Option<ArchivedAccount>> {
        Ok(self.record(id).await)
    }

    async fn find_by_numero(&self, numero: &str) -> StoreResult<Option<ArchivedAccount>> {
        let records = self.records.lock().await;
        Ok(records.values().find(|r| r.numero == numero).cloned())
    }

    async fn find_conflicting(
        &self,
        id: Uuid,
        numero: &str,
    ) -> StoreResult<Option<ArchivedAccount>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|r| r.id == id || r.numero == numero)
            .cloned())
    }

    async fn insert(&self, record: &ArchivedAccount) -> StoreResult<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected archive write failure".to_string()));
        }
        let mut records = self.records.lock().await;
        if records
            .values()
            .any(|r| r.id == record.id || r.numero == record.numero)
        {
            return Err(StoreError::Duplicate("archive record".to_string()));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected archive delete failure".to_string()));
        }
        Ok(self.records.lock().await.remove(&id).is_some())
    }

    async fn due_unblocks(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ArchivedAccount>> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| {
                r.status == AccountStatus::Blocked
                    && r.block_end_date.is_some_and(|end| end <= now)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list(&self, limit: i64, offset: i64) -> StoreResult<(Vec<ArchivedAccount>, i64)> {
        let records = self.records.lock().await;
        let mut all: Vec<ArchivedAccount> = records.values().cloned().collect();
        all.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
