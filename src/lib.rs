//! ==============================================================================
//! rasc - CO2 telemetry core
//! ==============================================================================
//!
//! purpose:
//!     everything between "the sensor was heard" and "someone was told":
//!
//!     ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//!     │ decoder  │──>│ sampler      │──>│ cache        │──>│ alerts   │──> notifier
//!     │ (extern) │   │ (loop task)  │   │ (latest)     │   │ (cooldown│
//!     └──────────┘   └──────┬───────┘   └──────┬───────┘   └──────────┘
//!                           │                  │ hook
//!                           ▼                  ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │ store        │   │ SSE stream   │
//!                    │ (history)    │   │ (server.rs)  │
//!                    └──────┬───────┘   └──────────────┘
//!                           ▼
//!                    query.rs / server.rs
//!
//! ==============================================================================

pub mod alerts;
pub mod cache;
pub mod clock;
pub mod decoder;
pub mod domain;
pub mod error;
pub mod file_store;
pub mod query;
pub mod sampler;
pub mod server;
pub mod store;
pub mod system;
