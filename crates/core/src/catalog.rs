//! Action lookup seam between the execution engine and the store.

use crate::error::StoreError;
use crate::model::ActionDefinition;
use async_trait::async_trait;

/// Read-only, by-name access to stored action definitions.
///
/// Agents reference actions by name, so the engine resolves each step
/// through this trait at execution time; a missing action is an
/// ordinary `Ok(None)`, not an error.
#[async_trait]
pub trait ActionCatalog: Send + Sync {
    async fn action_by_name(&self, name: &str)
    -> std::result::Result<Option<ActionDefinition>, StoreError>;
}
