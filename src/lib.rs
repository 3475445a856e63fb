// Library exports for Usapan
// This allows integration tests and the binary to share the same modules

pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod deploy;
pub mod error;
pub mod extractors;
pub mod mail;
pub mod routes;
pub mod social;
pub mod state;
pub mod votes;
