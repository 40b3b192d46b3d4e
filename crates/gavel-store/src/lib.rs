pub mod branch;
pub mod changes;
pub mod error;
pub mod snapshot;

pub use branch::{BranchStore, RefUpdate, RepoManager};
pub use changes::ChangeStore;
pub use error::StoreError;
