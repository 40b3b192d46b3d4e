use gavel_core::id::AccountId;
use gavel_core::types::Change;

/// Reason a capability check refused an action.
#[derive(Debug, Clone)]
pub struct Denied(pub String);

/// Access decisions are resolved outside the engine; the engine only
/// consumes the yes/no results.
pub trait Capabilities: Send + Sync {
    fn can_submit(&self, change: &Change, actor: AccountId) -> Result<(), Denied>;
    fn can_stage(&self, change: &Change, actor: AccountId) -> Result<(), Denied>;
    fn can_abandon(&self, change: &Change, actor: AccountId) -> Result<(), Denied>;
    fn can_defer(&self, change: &Change, actor: AccountId) -> Result<(), Denied>;
    fn can_restore(&self, change: &Change, actor: AccountId) -> Result<(), Denied>;
    /// Push rights on a branch; checked before a build result may move it.
    fn can_update_branch(
        &self,
        project: &str,
        ref_name: &str,
        actor: AccountId,
    ) -> Result<(), Denied>;
}

/// Permissive policy for embedding and tests.
pub struct AllowAll;

impl Capabilities for AllowAll {
    fn can_submit(&self, _change: &Change, _actor: AccountId) -> Result<(), Denied> {
        Ok(())
    }
    fn can_stage(&self, _change: &Change, _actor: AccountId) -> Result<(), Denied> {
        Ok(())
    }
    fn can_abandon(&self, _change: &Change, _actor: AccountId) -> Result<(), Denied> {
        Ok(())
    }
    fn can_defer(&self, _change: &Change, _actor: AccountId) -> Result<(), Denied> {
        Ok(())
    }
    fn can_restore(&self, _change: &Change, _actor: AccountId) -> Result<(), Denied> {
        Ok(())
    }
    fn can_update_branch(
        &self,
        _project: &str,
        _ref_name: &str,
        _actor: AccountId,
    ) -> Result<(), Denied> {
        Ok(())
    }
}
