//! # Hermes
//!
//! **Composite-identity document platform: Edge authoring and Central sync.**
//!
//! An Edge process authors documents against a local filesystem/Git backend
//! and a remote identity/notification backend, routed through a
//! multi-provider manager. A Central process accepts metadata sync from
//! many edges over HTTP, persisting an authoritative registry and a durable
//! retry queue.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐    ┌──────────────┐
//! │ LocalBackend  │──▶│  Manager          │───▶│ SyncQueue    │
//! │ (fs + git)    │   │ (routes by class) │    │ (FIFO/UUID)  │
//! └──────────────┘   └─────────┬─────────┘    └──────┬───────┘
//!                               │                      │
//!                     ┌─────────▼────────┐    ┌────────▼───────┐
//!                     │   ApiBackend      │    │ HttpSyncTransport │
//!                     │ (people/teams/..) │    │  (→ Central)      │
//!                     └───────────────────┘    └────────┬───────┘
//!                                                        ▼
//!                                            ┌────────────────────┐
//!                                            │ SyncRegistry (HTTP) │
//!                                            └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration loading and `env(NAME)` indirection |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema creation |
//! | [`token`] | Service-token issuance, validation, rotation, revocation |
//! | [`backend`] | Local (fs/Git) and API (HTTP) capability adapters |
//! | [`manager`] | Multi-provider routing and sync-policy enforcement |
//! | [`sync`] | Central registry and durable retry queue |
//! | [`http`] | Sync HTTP surface and its bearer-token auth middleware |
//! | [`search`] | Hybrid search orchestration (keyword + vector fan-out) |

pub mod backend;
pub mod config;
pub mod db;
pub mod http;
pub mod manager;
pub mod migrate;
pub mod search;
pub mod sync;
pub mod token;
