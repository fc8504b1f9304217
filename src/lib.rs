pub mod config;
pub mod error;
pub mod identity;
pub mod orgs;
pub mod server;
pub mod storage;
