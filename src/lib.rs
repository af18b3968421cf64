pub mod auth;
pub mod compactor;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod meeting;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
