//! # fragsync
//!
//! A local-first sync engine that keeps an embedded fragment index fresh
//! across many data-source connectors.
//!
//! A periodic scheduler decides which connectors are due, takes a per-connector
//! lock, and runs a sync job that streams fragments from the connector through
//! a sanitize → filter → dedup → embed → write pipeline while batching counter
//! updates into the connector's persisted state.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  tick / force   ┌────────────┐
//! │  Syncer    │────────────────▶│  SyncJob   │ one per due connector
//! │ (registry) │                 └─────┬──────┘
//! └─────┬──────┘                       │
//!       │               ┌──────────────┼──────────────┐
//!       │               ▼              ▼              ▼
//!       │        ┌───────────┐  ┌───────────┐  ┌────────────┐
//!       │        │ Connector │─▶│ Pipeline  │─▶│ Aggregator │
//!       │        │  (sync)   │  │ emb+write │  │ (counters) │
//!       │        └───────────┘  └─────┬─────┘  └─────┬──────┘
//!       ▼                             ▼              ▼
//! ┌──────────┐                  ┌─────────────────────────┐
//! │   HTTP   │                  │   IndexStore (SQLite)   │
//! └──────────┘                  └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fragsync init                 # create database
//! fragsync add filesystem notes # register a configured instance
//! fragsync sync                 # run one round
//! fragsync serve                # scheduler + HTTP trigger surface
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector`] | Connector trait and shared state plumbing |
//! | [`connector_fs`] | Filesystem connector |
//! | [`connectors`] | Connector type registry |
//! | [`scheduler`] | The syncer: registry, evaluation, periodic loop |
//! | [`job`] | One sync run for one connector |
//! | [`pipeline`] | Per-fragment ingestion |
//! | [`aggregator`] | Batched connector counter updates |
//! | [`report`] | Per-job sync summaries |
//! | [`embedding`] | Ollama embedding client |
//! | [`server`] | HTTP trigger surface |
//! | [`sqlite_store`] | SQLite `IndexStore` backend |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`boot`] | Process startup |

pub mod aggregator;
pub mod boot;
pub mod config;
pub mod connector;
pub mod connector_fs;
pub mod connectors;
pub mod db;
pub mod embedding;
pub mod error;
pub mod job;
pub mod migrate;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod server;
pub mod sqlite_store;
