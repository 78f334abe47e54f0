pub mod config;
pub mod engine;
pub mod housekeeping;
pub mod layout;
pub mod limits;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod wal;
