//! Per-file pipeline stages.
//!
//! Each submodule implements exactly one stage. The [`crate::processor`]
//! sequences them; no stage calls another.
//!
//! ## Data Flow
//!
//! ```text
//! convert ──▶ (validity) ──▶ extract ──▶ validate ──▶ notify
//! (TIFF→PDF)   (%PDF)        (OCR)       (stats)      (webhook)
//! ```
//!
//! 1. [`convert`] : decode every TIFF frame and write one temporary PDF;
//!    runs in `spawn_blocking` because image codecs are CPU-bound
//! 2. [`extract`] : drive a recognition backend through the submit/poll
//!    state machine with outer retry; the only stage with long waits
//! 3. [`validate`]: pure text statistics; an invalid verdict is a warning
//! 4. [`notify`]  : deliver the result (or an error report) with retry

pub mod convert;
pub mod extract;
pub mod notify;
pub mod validate;
