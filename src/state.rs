//! Shared state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        content_store::LocalContentStore, delegation_service::DelegationService,
        share_service::ShareService,
    },
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub shares: ShareService,
    pub delegations: DelegationService,
    /// Local payload store, used directly to serve `/content/{address}`.
    pub blobs: Arc<LocalContentStore>,
    pub config: Arc<AppConfig>,
}
