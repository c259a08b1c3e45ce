//! CLI command implementations.

pub mod add_user;
pub mod list_users;
pub mod serve;
