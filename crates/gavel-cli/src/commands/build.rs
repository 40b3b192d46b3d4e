use clap::{Args, Subcommand};

use gavel_core::id::AccountId;
use gavel_core::types::BranchKey;

use crate::session::Session;

#[derive(Args)]
pub struct BuildArgs {
    #[command(subcommand)]
    command: BuildCommand,
}

#[derive(Subcommand)]
enum BuildCommand {
    /// Snapshot the staging tip as a new build
    New {
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "main")]
        branch: String,
        /// Build identifier, e.g. a CI run id
        #[arg(long)]
        id: String,
        #[arg(long, default_value_t = 1)]
        account: u32,
    },
    /// Report the verdict of a finished build
    Result {
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long)]
        id: String,
        /// The build passed; its changes merge into the stable branch
        #[arg(long, conflicts_with = "fail")]
        pass: bool,
        /// The build failed; its changes return to the staging queue
        #[arg(long)]
        fail: bool,
        /// Free-form detail appended to each change's message
        #[arg(long, short)]
        message: Option<String>,
        #[arg(long, default_value_t = 1)]
        account: u32,
    },
    /// List the open changes carried by a build
    List {
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "main")]
        branch: String,
        #[arg(long)]
        id: String,
    },
}

pub fn run(args: BuildArgs) -> anyhow::Result<()> {
    match args.command {
        BuildCommand::New {
            project,
            branch,
            id,
            account,
        } => {
            let session = Session::open()?;
            let branch = BranchKey::new(&project, &format!("heads/{branch}"));
            let info = session
                .engine
                .new_build(&branch, &id, AccountId(account))?;
            println!(
                "Build {} at {} carries {} change(s)",
                info.build_ref,
                info.tip.short(),
                info.changes.len()
            );
            session.close()
        }
        BuildCommand::Result {
            project,
            branch,
            id,
            pass,
            fail,
            message,
            account,
        } => {
            if pass == fail {
                anyhow::bail!("pass exactly one of --pass or --fail");
            }
            let session = Session::open()?;
            let branch = BranchKey::new(&project, &format!("heads/{branch}"));
            let verdict = session.engine.report_build_result(
                &branch,
                &id,
                pass,
                AccountId(account),
                message.as_deref(),
            )?;
            session.engine.wait_idle();
            let word = if verdict.passed { "merged" } else { "returned to staging" };
            println!(
                "Build {}: {} change(s) {}",
                verdict.build_ref,
                verdict.changes.len(),
                word
            );
            session.close()
        }
        BuildCommand::List {
            project,
            branch,
            id,
        } => {
            let session = Session::open()?;
            let branch = BranchKey::new(&project, &format!("heads/{branch}"));
            for change in session.engine.changes_in_build(&branch, &id)? {
                println!(
                    "{}\t{:?}\t{}",
                    change.id,
                    change.status,
                    change.current_revision.short()
                );
            }
            session.close()
        }
    }
}
