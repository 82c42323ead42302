//! # Intake
//!
//! The ingestion resilience and content-identity core of a content
//! pipeline. Source connectors hand Intake raw items (articles, emails,
//! podcasts, videos); Intake gives every logical item a deterministic
//! identity, gates it through per-kind validation, assigns it a
//! collision-safe storage name, and keeps failed work in a durable
//! priority queue until it is retried to completion or exhausts its
//! attempts.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌───────────┐   ┌────────────┐
//! │ Connector  │──▶│ Identity │──▶│ Validator │──▶│ Collision  │──▶ writer
//! │ (external) │   │  hash/URL│   │  gates    │   │  resolver  │
//! └────────────┘   └──────────┘   └───────────┘   └─────┬──────┘
//!        │ failure                                      │ SQLite
//!        ▼                                              ▼
//! ┌────────────┐   ┌───────────┐   ┌──────────────────────────┐
//! │ Retry      │──▶│ Failure   │──▶│ Processor → Recovery     │
//! │ scheduler  │   │ queue     │   │ (per-kind, per-category) │
//! └────────────┘   └───────────┘   └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`identity`] | Content hash and URL-based dedup identity |
//! | [`validate`] | Per-kind validation gates |
//! | [`collision`] | Durable collision-safe filename resolution |
//! | [`queue`] | Durable failure queue state machine |
//! | [`processor`] | Kind-dispatched queue drain loop |
//! | [`retry`] | Backoff strategies and bounded retry execution |
//! | [`recovery`] | Error classification and automated recovery |
//! | [`stats`] | Queue statistics for the CLI |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod collision;
pub mod config;
pub mod db;
pub mod identity;
pub mod migrate;
pub mod models;
pub mod processor;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod stats;
pub mod validate;
