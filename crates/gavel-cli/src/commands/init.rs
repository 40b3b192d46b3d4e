use clap::Args;

use gavel_core::types::Tree;

use crate::config::GavelConfig;
use crate::session::Session;

#[derive(Args)]
pub struct InitArgs {
    /// Project to create
    #[arg(long)]
    project: String,
    /// Initial stable branch (short name)
    #[arg(long, default_value = "main")]
    branch: String,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    let root = std::env::current_dir()?.join(".gavel");
    std::fs::create_dir_all(&root)?;
    GavelConfig::write_default(&root)?;

    let session = Session::open_at(root)?;
    let ctx = session.engine.context();
    let repo = ctx.repos.open(&args.project);
    let ref_name = format!("heads/{}", args.branch);
    if repo.resolve_ref(&ref_name).is_some() {
        anyhow::bail!("branch '{}' already exists in '{}'", args.branch, args.project);
    }
    let root_commit = repo.create_commit(
        vec![],
        Tree::new(),
        &ctx.integrator,
        &format!("Initial empty commit for {}", args.branch),
        gavel_engine::context::now_ms(),
    )?;
    repo.cas_update_ref(&ref_name, None, root_commit, false)?;
    println!(
        "Initialized project '{}' with branch {} at {}",
        args.project,
        ref_name,
        root_commit.short()
    );
    session.close()
}
