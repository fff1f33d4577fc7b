//! pqracquire - unattended PQR record acquisition.
//!
//! Drives a utility company's customer-service portal (petitions, complaints
//! and claims), walks its paginated listing, extracts each record's detail
//! view with attachments and a rendered artifact, and persists the result
//! idempotently to SQLite plus a content-addressed object store.

pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod migrations;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod storage;
pub mod utils;
