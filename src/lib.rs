pub mod auth;
pub mod binlog;
pub mod config;
pub mod handler;
pub mod observability;
pub mod proto;
pub mod server;
pub mod storage;

pub use auth::{AuthContext, Authenticator};
pub use storage::{ObjectStore, PutOutcome};
