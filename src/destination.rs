//! Destination resolution
//!
//! The final artifact is handed to a resolver that decides where it goes. In
//! an interactive application this is where the user is asked; the core only
//! needs the decision.

use crate::types::{DestinationKind, TransferRequest};
use async_trait::async_trait;
use std::path::Path;

/// Chooses a destination for a finished artifact
///
/// Ownership of the file at `artifact` passes to the resolver's caller once a
/// kind is returned; the resolver itself must not move or delete it.
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    /// Decide where the artifact for `request` should go
    async fn resolve(&self, artifact: &Path, request: &TransferRequest) -> DestinationKind;
}

/// Resolver that always picks the same destination
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedDestination(pub DestinationKind);

impl Default for FixedDestination {
    fn default() -> Self {
        Self(DestinationKind::FileExport)
    }
}

#[async_trait]
impl DestinationResolver for FixedDestination {
    async fn resolve(&self, _artifact: &Path, _request: &TransferRequest) -> DestinationKind {
        self.0
    }
}
