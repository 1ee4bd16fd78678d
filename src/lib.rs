//! # Feature Tracker
//!
//! Watches remote files and keeps an append-only, content-addressed version
//! history of them.
//!
//! Feature Tracker checks a set of static URLs plus any URLs discovered by
//! rendering dynamic sources in a browser, records a new version whenever a
//! file's content hash differs from the last one seen, keeps a local snapshot
//! of each version and optionally uploads it to object storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌───────────┐
//! │  Discovery  │──▶│   Fetch +   │──▶│  Version  │
//! │  (Chromium) │   │  Novelty    │   │   Store   │
//! └─────────────┘   └──────┬──────┘   └─────┬─────┘
//!                          │                │
//!                          ▼                ▼
//!                    ┌──────────┐     ┌───────────┐
//!                    │  Upload  │     │ Snapshots │
//!                    │ Supabase │     │  + JSON   │
//!                    │   / S3   │     └───────────┘
//!                    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ftrack init                   # write ./config/ftrack.toml
//! ftrack sources                # list what will be watched
//! ftrack check                  # one change-detection run
//! ftrack history                # what has been recorded
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error types per stage |
//! | [`sources`] | Static URLs and dynamic source descriptors |
//! | [`fetch`] | HTTP content fetcher |
//! | [`browser`] | Browser session capability and Chromium backend |
//! | [`challenge`] | Human-verification challenge handling |
//! | [`extract`] | Candidate URL extraction from rendered pages |
//! | [`discovery`] | Dynamic source discovery |
//! | [`store`] | Version history persistence and snapshots |
//! | [`upload`] | Supabase and S3 uploads |
//! | [`capabilities`] | Backend resolution at startup |
//! | [`check`] | The change-detection run |
//! | [`progress`] | Progress reporting on stderr |
//! | [`shutdown`] | Ctrl-C handling |
//! | [`history`] | Read-only history and stats views |

pub mod browser;
pub mod capabilities;
pub mod challenge;
pub mod check;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod history;
pub mod models;
pub mod progress;
pub mod shutdown;
pub mod sources;
pub mod store;
pub mod upload;
