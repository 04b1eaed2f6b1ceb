//! API layer for osb-daemon

pub mod rest;

pub use rest::create_router;
