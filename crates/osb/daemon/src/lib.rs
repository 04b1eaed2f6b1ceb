//! OSB daemon library
//!
//! Open Service Broker v2.12 front end for the web application firewall:
//! - REST API handlers for catalog, instances, bindings and polling
//! - Protocol engine with per-instance mutual exclusion
//! - Storage backends (in-memory and PostgreSQL)
//! - Operation sweeper
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use config::DaemonConfig;
pub use engine::Broker;
pub use error::{BrokerError, DaemonError, StorageError};
pub use scheduler::Scheduler;
pub use server::Server;
pub use storage::{InMemoryStore, PostgresStore, Store};
