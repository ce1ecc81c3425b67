pub mod authorize;
pub mod capture;
pub mod clients;
pub mod config;
pub mod error;
pub mod jwt;
pub mod pkce;
pub mod progress;
pub mod query;
pub mod scopes;
pub mod store;
pub mod tokens;
pub mod visit;
