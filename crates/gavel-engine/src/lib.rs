pub mod approve;
pub mod capability;
pub mod context;
pub mod delegate;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod op;
pub mod queue;
pub mod staging;

pub use approve::{BuildInfo, BuildVerdict};
pub use capability::{AllowAll, Capabilities, Denied};
pub use context::{EngineContext, IntegrationConfig};
pub use delegate::MergeDelegate;
pub use engine::{Engine, EngineBuilder};
pub use error::EngineError;
pub use notify::{Event, LogNotifier, Notifier};
pub use op::OpReport;
pub use queue::{IntegrationQueue, QueueHandle};
