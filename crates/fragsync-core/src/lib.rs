//! # fragsync core
//!
//! Runtime-independent logic for fragsync: data models, the fragment
//! sanitizer, content hashing, word-window chunking, the store abstraction
//! and the embedding trait.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem I/O. The sync
//! engine, connectors and concrete backends live in the `fragsync` crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod hash;
pub mod models;
pub mod sanitize;
pub mod store;
