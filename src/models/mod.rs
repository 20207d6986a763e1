// Models module - Database entity representations

pub mod account;
pub mod archived_account;
pub mod client;
pub mod user;

pub use account::{Account, AccountKind, AccountStatus, AccountView};
pub use archived_account::ArchivedAccount;
pub use client::Client;
pub use user::{Role, User};
