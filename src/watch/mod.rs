//! Finding documents in the watched directory.
//!
//! ```text
//! discovery ──▶ (candidates) ──▶ readiness ──▶ pipeline
//!     ▲                                           │
//!     └──────────── cache (mark / reconcile) ◀────┘
//! ```
//!
//! 1. [`discovery`]: walk the tree, filter by extension, recency and cache
//! 2. [`readiness`]: debounce a candidate until it is no longer being written
//! 3. [`cache`]    : the only state shared between workers

pub mod cache;
pub mod discovery;
pub mod readiness;
