//! Service layer: the share-link engine and the stores it depends on.

pub mod content_store;
pub mod delegation_service;
pub mod ids;
pub mod repository;
pub mod share_service;
pub mod sqlite_repository;
