//! Core data models for the file-sharing service.
//!
//! These entities map to the `shares`, `attachments` and `jobs` tables via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod attachment;
pub mod job;
pub mod share;
