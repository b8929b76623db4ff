//! Domain types and rules for the text-to-3D generation job lifecycle.
//!
//! Everything here is pure: no I/O, no clocks beyond `Utc::now()` for
//! `updated_at`. The stores, provider clients, and the pipeline build on
//! these types.

pub mod error;
pub mod job;
pub mod lifecycle;
pub mod prompt;
pub mod task;
pub mod types;
