pub mod content_handlers;
pub mod delegation_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod share_handlers;
