//! Share lifecycle engine and its collaborators.

pub mod auth;
pub mod bundle;
pub mod job_queue;
pub mod notifier;
pub mod share_service;
pub mod worker;
