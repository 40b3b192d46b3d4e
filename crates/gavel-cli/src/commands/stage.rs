use clap::Args;

use gavel_core::id::{AccountId, ChangeId};
use gavel_core::types::BranchKey;

use crate::session::Session;

#[derive(Args)]
pub struct StageArgs {
    /// Change to stage
    change: u32,
    /// Acting account id
    #[arg(long, default_value_t = 1)]
    account: u32,
}

#[derive(Args)]
pub struct UnstageArgs {
    /// Change to unstage
    change: u32,
    /// Acting account id
    #[arg(long, default_value_t = 1)]
    account: u32,
}

#[derive(Args)]
pub struct RebuildArgs {
    /// Project whose staging branch to rebuild
    #[arg(long)]
    project: String,
    /// Stable branch (short name)
    #[arg(long, default_value = "main")]
    branch: String,
    /// Acting account id
    #[arg(long, default_value_t = 1)]
    account: u32,
}

pub fn run_stage(args: StageArgs) -> anyhow::Result<()> {
    let session = Session::open()?;
    let id = ChangeId(args.change);
    session.engine.stage(id, AccountId(args.account))?;
    session.engine.wait_idle();

    let change = session.engine.context().changes.get(id)?;
    println!("Change {} is now {:?}", change.id, change.status);
    session.close()
}

pub fn run_unstage(args: UnstageArgs) -> anyhow::Result<()> {
    let session = Session::open()?;
    let id = ChangeId(args.change);
    session.engine.unstage(id, AccountId(args.account))?;
    session.engine.wait_idle();

    let change = session.engine.context().changes.get(id)?;
    println!("Change {} is now {:?}", change.id, change.status);
    session.close()
}

pub fn run_rebuild(args: RebuildArgs) -> anyhow::Result<()> {
    let session = Session::open()?;
    let branch = BranchKey::new(&args.project, &format!("heads/{}", args.branch));
    session
        .engine
        .rebuild_staging(&branch, AccountId(args.account))?;
    session.engine.wait_idle();
    println!("Rebuilt staging branch for {branch}");
    session.close()
}
