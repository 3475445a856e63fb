pub mod accounts;
pub mod handlers;
pub mod password;
pub mod permissions;
pub mod session;
pub mod tokens;
