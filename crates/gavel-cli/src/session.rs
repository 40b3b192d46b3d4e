use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use gavel_engine::Engine;
use gavel_store::snapshot;

use crate::config::{find_state_root, GavelConfig};

/// One CLI invocation: load the snapshot, act on it, save it back.
pub struct Session {
    root: PathBuf,
    pub engine: Engine,
}

impl Session {
    pub fn open() -> anyhow::Result<Self> {
        let root = find_state_root()?;
        Self::open_at(root)
    }

    pub fn open_at(root: PathBuf) -> anyhow::Result<Self> {
        let config = GavelConfig::load(&root)?;
        let (repos, changes) = snapshot::load(&root.join("state.json"))?;
        debug!(root = %root.display(), workers = config.workers, "workspace opened");
        let mut builder = Engine::builder(Arc::new(repos), Arc::new(changes))
            .config(config.integration)
            .project_policies(config.projects)
            .workers(config.workers);
        if let Some(integrator) = &config.integrator {
            builder = builder.integrator(integrator);
        }
        Ok(Self {
            root,
            engine: builder.build(),
        })
    }

    /// Finish queued integration work and persist the result.
    pub fn close(self) -> anyhow::Result<()> {
        self.engine.wait_idle();
        let ctx = self.engine.context();
        snapshot::save(&self.root.join("state.json"), &ctx.repos, &ctx.changes)?;
        Ok(())
    }
}
