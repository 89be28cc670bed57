//! Database layer for habitstats
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Typed queries over habits and check-ins
//! - Upserts for the derived stats caches and narrated insights

pub mod repo;
pub mod schema;

pub use repo::{Database, STORED_DATE_FORMAT, STORED_TIMESTAMP_FORMAT};
