use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use url::Url;
use uuid::Uuid;

use crate::models::{Account, AccountKind, AccountStatus, AccountView, Role};
use crate::services::store::{PrimaryStore, StoreError};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Which accounts a caller may see in listings.
///
/// Archived and soft-deleted rows are never listed. Checking accounts are
/// listed whatever their status, savings accounts only while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    All,
    Client(Uuid),
    Nobody,
}

impl Visibility {
    pub fn for_role(role: Role, client_id: Option<Uuid>) -> Self {
        match (role, client_id) {
            (Role::Admin, _) => Visibility::All,
            (Role::Client, Some(id)) => Visibility::Client(id),
            (Role::Client, None) => Visibility::Nobody,
        }
    }

    /// Ownership part of the rule only
    pub fn covers_client(&self, client_id: Uuid) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Client(id) => *id == client_id,
            Visibility::Nobody => false,
        }
    }

    pub fn matches(&self, account: &Account) -> bool {
        account.is_live()
            && (account.kind == AccountKind::Checking || account.status == AccountStatus::Active)
            && self.covers_client(account.client_id)
    }

    /// Appends the predicate for the `accounts a` alias
    pub fn push_sql(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" a.deleted_at IS NULL AND a.archived_at IS NULL");
        builder.push(" AND (a.kind = 'checking' OR a.status = 'active')");
        match self {
            Visibility::All => {}
            Visibility::Client(id) => {
                builder.push(" AND a.client_id = ");
                builder.push_bind(*id);
            }
            Visibility::Nobody => {
                builder.push(" AND FALSE");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "a.created_at",
            SortField::UpdatedAt => "a.updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Raw listing parameters as received on the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountQuery {
    pub kind: Option<AccountKind>,
    pub status: Option<AccountStatus>,
    pub currency: Option<String>,
    pub search: Option<String>,
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Normalized listing parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ListParams {
    pub kind: Option<AccountKind>,
    pub status: Option<AccountStatus>,
    pub currency: Option<String>,
    pub search: Option<String>,
    pub sort: SortField,
    pub order: SortOrder,
    pub page: i64,
    pub limit: i64,
}

impl Default for ListParams {
    fn default() -> Self {
        AccountQuery::default().normalize()
    }
}

impl AccountQuery {
    pub fn normalize(&self) -> ListParams {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        ListParams {
            kind: self.kind,
            status: self.status,
            currency: non_empty(&self.currency).map(|c| c.to_uppercase()),
            search: non_empty(&self.search),
            sort: self.sort.unwrap_or_default(),
            order: self.order.unwrap_or_default(),
            page: self.page.unwrap_or(1).max(1),
            limit: self
                .limit
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }
}

/// Row offset of a 1-based page; saturates so huge page numbers yield an empty page
pub fn page_offset(page: i64, limit: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(limit)
}

/// Escapes `%`, `_` and `\` so user text matches literally under `ILIKE ... ESCAPE '\'`
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl ListParams {
    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.limit)
    }

    /// Filter part of the listing, visibility excluded
    pub fn matches(&self, view: &AccountView) -> bool {
        let account = &view.account;

        if self.kind.is_some_and(|kind| kind != account.kind) {
            return false;
        }
        if self.status.is_some_and(|status| status != account.status) {
            return false;
        }
        if let Some(currency) = &self.currency {
            if !account.currency.eq_ignore_ascii_case(currency) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            return account.numero.to_lowercase().contains(&needle)
                || view.holder_name.to_lowercase().contains(&needle);
        }

        true
    }

    /// Appends `WHERE ...` for the `accounts a JOIN clients c` listing
    pub fn push_where(&self, visibility: &Visibility, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" WHERE");
        visibility.push_sql(builder);

        if let Some(kind) = self.kind {
            builder.push(" AND a.kind = ");
            builder.push_bind(kind);
        }
        if let Some(status) = self.status {
            builder.push(" AND a.status = ");
            builder.push_bind(status);
        }
        if let Some(currency) = &self.currency {
            builder.push(" AND UPPER(a.currency) = ");
            builder.push_bind(currency.clone());
        }
        if let Some(search) = &self.search {
            let pattern = format!("%{}%", escape_like(search));
            builder.push(" AND (a.numero ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\' OR c.name ILIKE ");
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }
    }

    pub fn push_order(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        let direction = match self.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        builder.push(format!(
            " ORDER BY {} {}, a.id {}",
            self.sort.column(),
            direction,
            direction
        ));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_items: i64,
    pub items_per_page: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total_items: i64) -> Self {
        let total_pages = if total_items == 0 {
            0
        } else {
            (total_items + limit - 1) / limit
        };

        Self {
            current_page: page,
            total_pages,
            total_items,
            items_per_page: limit,
            has_next: page < total_pages,
            has_previous: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub first: String,
    pub last: String,
    pub next: Option<String>,
    pub previous: Option<String>,
}

impl PageLinks {
    pub fn build(base: &Url, params: &ListParams, pagination: &Pagination) -> Self {
        let link = |page: i64| {
            let mut url = base.clone();
            {
                let mut pairs = url.query_pairs_mut();
                pairs.clear();
                if let Some(kind) = params.kind {
                    pairs.append_pair("kind", kind.as_str());
                }
                if let Some(status) = params.status {
                    pairs.append_pair("status", status.as_str());
                }
                if let Some(currency) = &params.currency {
                    pairs.append_pair("currency", currency);
                }
                if let Some(search) = &params.search {
                    pairs.append_pair("search", search);
                }
                pairs.append_pair(
                    "sort",
                    match params.sort {
                        SortField::CreatedAt => "created_at",
                        SortField::UpdatedAt => "updated_at",
                    },
                );
                pairs.append_pair(
                    "order",
                    match params.order {
                        SortOrder::Asc => "asc",
                        SortOrder::Desc => "desc",
                    },
                );
                pairs.append_pair("page", &page.to_string());
                pairs.append_pair("limit", &params.limit.to_string());
            }
            url.to_string()
        };

        let last_page = pagination.total_pages.max(1);

        Self {
            self_link: link(pagination.current_page),
            first: link(1),
            last: link(last_page),
            next: pagination
                .has_next
                .then(|| link(pagination.current_page + 1)),
            previous: pagination
                .has_previous
                .then(|| link((pagination.current_page - 1).min(last_page))),
        }
    }
}

/// Lists the accounts visible under `visibility`
pub async fn list_accounts(
    store: &dyn PrimaryStore,
    visibility: Visibility,
    params: &ListParams,
) -> Result<(Vec<AccountView>, Pagination), StoreError> {
    if visibility == Visibility::Nobody {
        return Ok((Vec::new(), Pagination::new(params.page, params.limit, 0)));
    }

    let (accounts, total) = store.list_accounts(&visibility, params).await?;
    tracing::debug!(
        ?visibility,
        returned = accounts.len(),
        total,
        "Listed accounts"
    );

    Ok((accounts, Pagination::new(params.page, params.limit, total)))
}
