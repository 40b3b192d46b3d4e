use tracing::info;

use gavel_core::id::AccountId;
use gavel_core::types::Change;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ChangeMerged,
    ChangeStaged,
    ChangeUnstaged,
    ChangeAbandoned,
    ChangeDeferred,
    ChangeRestored,
    ChangeReverted,
    RefUpdated,
    BuildCreated,
    BuildApproved,
    BuildRejected,
}

/// Fire-and-forget notification sink. Implementations must not block the
/// state transition that triggered them; failures are logged by the
/// implementation, never propagated.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: Event, change: Option<&Change>, actor: AccountId, detail: &str);
}

/// Default sink: structured log lines only.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: Event, change: Option<&Change>, actor: AccountId, detail: &str) {
        match change {
            Some(change) => info!(?event, change = %change.id, %actor, detail, "event"),
            None => info!(?event, %actor, detail, "event"),
        }
    }
}
