use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use gavel_core::id::AccountId;
use gavel_merge::Strategy;
use gavel_store::{ChangeStore, RepoManager};

use crate::capability::Capabilities;
use crate::delegate::MergeDelegate;
use crate::notify::Notifier;

/// Which strategy each delegate runs. The staging line defaults to
/// cherry-pick so picked commits can be dropped again by a rebuild.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub submit_strategy: Strategy,
    pub staging_strategy: Strategy,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            submit_strategy: Strategy::MergeIfNecessary,
            staging_strategy: Strategy::CherryPick,
        }
    }
}

/// Shared collaborators every operation needs.
pub struct EngineContext {
    pub repos: Arc<RepoManager>,
    pub changes: Arc<ChangeStore>,
    pub notifier: Arc<dyn Notifier>,
    pub caps: Arc<dyn Capabilities>,
    pub config: IntegrationConfig,
    /// Per-project overrides of the default integration policy.
    pub project_policies: BTreeMap<String, IntegrationConfig>,
    /// Author recorded on synthesized merge commits.
    pub integrator: String,
    /// Account attributed to machine-recorded lifecycle messages.
    pub system_account: AccountId,
}

impl EngineContext {
    pub fn strategy_for(&self, project: &str, delegate: MergeDelegate) -> Strategy {
        let config = self.project_policies.get(project).unwrap_or(&self.config);
        match delegate {
            MergeDelegate::Submit => config.submit_strategy,
            MergeDelegate::Staging => config.staging_strategy,
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
