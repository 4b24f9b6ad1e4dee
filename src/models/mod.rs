//! Core data models for the share-link service.
//!
//! A `FileRecord` describes bytes already pinned in the content store; a
//! `ShareLink` is a bearer capability pointing at that content address.
//! Both map to database rows via `sqlx::FromRow` and serialize as camelCase
//! JSON via `serde`.

pub mod delegation;
pub mod file;
pub mod share_link;
