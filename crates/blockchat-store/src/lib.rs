//! # blockchat-store
//!
//! Local persistent cache for the BlockChat client, backed by SQLite.
//!
//! The crate stores one JSON [`Snapshot`] of the synchronized state per user
//! key.  It exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for loading and saving
//! snapshots.

pub mod database;
pub mod migrations;
pub mod models;
pub mod snapshots;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
