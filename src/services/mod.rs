// Services module - Business logic

pub mod account_query;
pub mod archive_transfer;
pub mod bootstrap;
pub mod lifecycle;
pub mod password;
pub mod store;
