//! Top-level handle wiring the stores, the worker pool and the lifecycle
//! actions together.

use std::collections::BTreeMap;
use std::sync::Arc;

use gavel_core::id::{AccountId, ChangeId, ObjectId};
use gavel_core::types::{BranchKey, Change, Tree};
use gavel_store::{ChangeStore, RepoManager};

use gavel_merge::Outcome;

use crate::approve::{self, BuildInfo, BuildVerdict};
use crate::capability::{AllowAll, Capabilities};
use crate::context::{EngineContext, IntegrationConfig};
use crate::lifecycle;
use crate::op;
use crate::notify::{LogNotifier, Notifier};
use crate::queue::{IntegrationQueue, QueueHandle};
use crate::staging;
use crate::EngineError;

pub struct EngineBuilder {
    repos: Arc<RepoManager>,
    changes: Arc<ChangeStore>,
    notifier: Arc<dyn Notifier>,
    caps: Arc<dyn Capabilities>,
    config: IntegrationConfig,
    project_policies: BTreeMap<String, IntegrationConfig>,
    integrator: String,
    system_account: AccountId,
    workers: usize,
}

impl EngineBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn capabilities(mut self, caps: Arc<dyn Capabilities>) -> Self {
        self.caps = caps;
        self
    }

    pub fn config(mut self, config: IntegrationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn project_policies(mut self, policies: BTreeMap<String, IntegrationConfig>) -> Self {
        self.project_policies = policies;
        self
    }

    pub fn integrator(mut self, name: &str) -> Self {
        self.integrator = name.to_string();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn build(self) -> Engine {
        let ctx = Arc::new(EngineContext {
            repos: self.repos,
            changes: self.changes,
            notifier: self.notifier,
            caps: self.caps,
            config: self.config,
            project_policies: self.project_policies,
            integrator: self.integrator,
            system_account: self.system_account,
        });
        let queue = IntegrationQueue::new(Arc::clone(&ctx), self.workers);
        Engine { ctx, queue }
    }
}

/// The integration engine. Lifecycle actions apply their record updates
/// synchronously; the actual branch integration runs on the queue, one run
/// per branch at a time.
pub struct Engine {
    ctx: Arc<EngineContext>,
    queue: IntegrationQueue,
}

impl Engine {
    pub fn builder(repos: Arc<RepoManager>, changes: Arc<ChangeStore>) -> EngineBuilder {
        EngineBuilder {
            repos,
            changes,
            notifier: Arc::new(LogNotifier),
            caps: Arc::new(AllowAll),
            config: IntegrationConfig::default(),
            project_policies: BTreeMap::new(),
            integrator: "integration".to_string(),
            system_account: AccountId(0),
            workers: 2,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn handle(&self) -> QueueHandle {
        self.queue.handle()
    }

    /// Block until no integration work is queued or running.
    pub fn wait_idle(&self) {
        if self.has_workers() {
            self.queue.wait_idle();
        } else {
            self.queue.drain();
        }
    }

    fn has_workers(&self) -> bool {
        self.queue.worker_count() > 0
    }

    pub fn upload_change(
        &self,
        project: &str,
        dest: &str,
        owner: AccountId,
        parents: Vec<ObjectId>,
        tree: Tree,
        message: &str,
    ) -> Result<Change, EngineError> {
        lifecycle::upload_change(&self.ctx, project, dest, owner, parents, tree, message)
    }

    pub fn upload_patch_set(
        &self,
        change_id: ChangeId,
        uploader: AccountId,
        parents: Vec<ObjectId>,
        tree: Tree,
        message: &str,
    ) -> Result<Change, EngineError> {
        lifecycle::upload_patch_set(
            &self.ctx,
            &self.handle(),
            change_id,
            uploader,
            parents,
            tree,
            message,
        )
    }

    pub fn submit(&self, change_id: ChangeId, actor: AccountId) -> Result<Change, EngineError> {
        lifecycle::submit(&self.ctx, &self.handle(), change_id, actor)
    }

    /// Dry run of the submit strategy for one change; the branch and the
    /// record stay untouched.
    pub fn check_integration(&self, change_id: ChangeId) -> Result<Outcome, EngineError> {
        op::check_candidate(&self.ctx, change_id)
    }

    pub fn stage(&self, change_id: ChangeId, actor: AccountId) -> Result<Change, EngineError> {
        lifecycle::stage(&self.ctx, &self.handle(), change_id, actor)
    }

    pub fn unstage(&self, change_id: ChangeId, actor: AccountId) -> Result<Change, EngineError> {
        lifecycle::unstage(&self.ctx, &self.handle(), change_id, actor)
    }

    pub fn abandon(
        &self,
        change_id: ChangeId,
        actor: AccountId,
        reason: Option<&str>,
    ) -> Result<Change, EngineError> {
        lifecycle::abandon(&self.ctx, &self.handle(), change_id, actor, reason)
    }

    pub fn defer(&self, change_id: ChangeId, actor: AccountId) -> Result<Change, EngineError> {
        lifecycle::defer(&self.ctx, &self.handle(), change_id, actor)
    }

    pub fn restore(&self, change_id: ChangeId, actor: AccountId) -> Result<Change, EngineError> {
        lifecycle::restore(&self.ctx, change_id, actor)
    }

    pub fn revert(&self, change_id: ChangeId, actor: AccountId) -> Result<Change, EngineError> {
        lifecycle::revert(&self.ctx, change_id, actor)
    }

    pub fn rebuild_staging(
        &self,
        branch: &BranchKey,
        actor: AccountId,
    ) -> Result<(), EngineError> {
        staging::rebuild_staging(&self.ctx, &self.handle(), branch, actor)
    }

    pub fn new_build(
        &self,
        branch: &BranchKey,
        build_id: &str,
        actor: AccountId,
    ) -> Result<BuildInfo, EngineError> {
        approve::new_build(&self.ctx, branch, build_id, actor)
    }

    pub fn changes_in_build(
        &self,
        branch: &BranchKey,
        build_id: &str,
    ) -> Result<Vec<Change>, EngineError> {
        approve::changes_in_build(&self.ctx, branch, build_id)
    }

    pub fn report_build_result(
        &self,
        branch: &BranchKey,
        build_id: &str,
        passed: bool,
        actor: AccountId,
        detail: Option<&str>,
    ) -> Result<BuildVerdict, EngineError> {
        approve::report_build_result(
            &self.ctx,
            &self.handle(),
            branch,
            build_id,
            passed,
            actor,
            detail,
        )
    }
}
