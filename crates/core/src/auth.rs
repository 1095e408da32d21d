//! Authorization collaborator consulted before permission-gated tools run.

use async_trait::async_trait;

use crate::tool::ToolContext;

/// Decides whether the caller in `context` may exercise `permission`.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can_perform(&self, permission: &str, context: &ToolContext) -> bool;
}

/// Grants every permission. The default when no authorization layer is wired in.
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn can_perform(&self, _permission: &str, _context: &ToolContext) -> bool {
        true
    }
}
