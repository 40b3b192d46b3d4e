pub mod approval;
pub mod branch;
pub mod change;
pub mod commit;
pub mod message;
pub mod revision;

pub use approval::{Approval, ApprovalCategory};
pub use branch::BranchKey;
pub use change::{Change, ChangeStatus};
pub use commit::{Commit, Tree};
pub use message::Message;
pub use revision::Revision;
