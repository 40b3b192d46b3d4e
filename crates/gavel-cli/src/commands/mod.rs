pub mod build;
pub mod change;
pub mod init;
pub mod review;
pub mod stage;
pub mod submit;
pub mod upload;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a gavel workspace and project branch
    Init(init::InitArgs),
    /// Upload a change or a new patch set
    Upload(upload::UploadArgs),
    /// Record a review approval on a change
    Review(review::ReviewArgs),
    /// Submit a change to its destination branch
    Submit(submit::SubmitArgs),
    /// Queue a change for the staging branch
    Stage(stage::StageArgs),
    /// Take a change back out of staging
    Unstage(stage::UnstageArgs),
    /// Reset the staging branch and re-apply staged changes
    RebuildStaging(stage::RebuildArgs),
    /// Cut and settle integration builds
    Build(build::BuildArgs),
    /// Inspect and manage changes
    Change(change::ChangeArgs),
}

impl Commands {
    pub fn run(self) -> anyhow::Result<()> {
        match self {
            Commands::Init(args) => init::run(args),
            Commands::Upload(args) => upload::run(args),
            Commands::Review(args) => review::run(args),
            Commands::Submit(args) => submit::run(args),
            Commands::Stage(args) => stage::run_stage(args),
            Commands::Unstage(args) => stage::run_unstage(args),
            Commands::RebuildStaging(args) => stage::run_rebuild(args),
            Commands::Build(args) => build::run(args),
            Commands::Change(args) => change::run(args),
        }
    }
}
