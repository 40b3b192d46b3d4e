use clap::{Args, Subcommand};

use gavel_core::id::{AccountId, ChangeId};
use gavel_core::types::ChangeStatus;

use crate::session::Session;

#[derive(Args)]
pub struct ChangeArgs {
    #[command(subcommand)]
    command: ChangeCommand,
}

#[derive(Subcommand)]
enum ChangeCommand {
    /// List changes, optionally filtered by project, branch or status
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one change with its messages
    Show { change: u32 },
    /// Check whether a change would integrate cleanly, without submitting
    Check { change: u32 },
    /// Abandon an open change
    Abandon {
        change: u32,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, default_value_t = 1)]
        account: u32,
    },
    /// Defer an open change
    Defer {
        change: u32,
        #[arg(long, default_value_t = 1)]
        account: u32,
    },
    /// Restore an abandoned or deferred change
    Restore {
        change: u32,
        #[arg(long, default_value_t = 1)]
        account: u32,
    },
    /// Create a change undoing a merged change
    Revert {
        change: u32,
        #[arg(long, default_value_t = 1)]
        account: u32,
    },
}

fn parse_status(s: &str) -> anyhow::Result<ChangeStatus> {
    match s.to_ascii_lowercase().as_str() {
        "new" => Ok(ChangeStatus::New),
        "staging" => Ok(ChangeStatus::Staging),
        "staged" => Ok(ChangeStatus::Staged),
        "integrating" => Ok(ChangeStatus::Integrating),
        "submitted" => Ok(ChangeStatus::Submitted),
        "merged" => Ok(ChangeStatus::Merged),
        "abandoned" => Ok(ChangeStatus::Abandoned),
        "deferred" => Ok(ChangeStatus::Deferred),
        other => anyhow::bail!("unknown status '{other}'"),
    }
}

pub fn run(args: ChangeArgs) -> anyhow::Result<()> {
    match args.command {
        ChangeCommand::List {
            project,
            branch,
            status,
        } => {
            let session = Session::open()?;
            let status = status.as_deref().map(parse_status).transpose()?;
            let branch = branch.map(|b| format!("heads/{b}"));
            for change in session.engine.context().changes.all_changes() {
                if project.as_deref().is_some_and(|p| p != change.project) {
                    continue;
                }
                if branch.as_deref().is_some_and(|b| b != change.dest) {
                    continue;
                }
                if status.is_some_and(|s| s != change.status) {
                    continue;
                }
                println!(
                    "{}\t{:?}\t{}\t{}\t{}",
                    change.id,
                    change.status,
                    change.project,
                    change.dest,
                    change.current_revision.short()
                );
            }
            session.close()
        }
        ChangeCommand::Show { change } => {
            let session = Session::open()?;
            let ctx = session.engine.context();
            let change = ctx.changes.get(ChangeId(change))?;
            println!("Change {} ({:?})", change.id, change.status);
            println!("  project:   {}", change.project);
            println!("  branch:    {}", change.dest);
            if let Some(topic) = &change.topic {
                println!("  topic:     {topic}");
            }
            println!("  owner:     {}", change.owner);
            println!(
                "  patch set: {} at {}",
                change.current_patch_set,
                change.current_revision.short()
            );
            for message in ctx.changes.messages_of(change.id) {
                println!("---");
                println!("{}", message.text);
            }
            session.close()
        }
        ChangeCommand::Check { change } => {
            let session = Session::open()?;
            let outcome = session.engine.check_integration(ChangeId(change))?;
            println!("Change {change} would integrate as {outcome:?}");
            session.close()
        }
        ChangeCommand::Abandon {
            change,
            reason,
            account,
        } => {
            let session = Session::open()?;
            let updated = session.engine.abandon(
                ChangeId(change),
                AccountId(account),
                reason.as_deref(),
            )?;
            session.engine.wait_idle();
            println!("Change {} is now {:?}", updated.id, updated.status);
            session.close()
        }
        ChangeCommand::Defer { change, account } => {
            let session = Session::open()?;
            let updated = session.engine.defer(ChangeId(change), AccountId(account))?;
            session.engine.wait_idle();
            println!("Change {} is now {:?}", updated.id, updated.status);
            session.close()
        }
        ChangeCommand::Restore { change, account } => {
            let session = Session::open()?;
            let updated = session.engine.restore(ChangeId(change), AccountId(account))?;
            println!("Change {} is now {:?}", updated.id, updated.status);
            session.close()
        }
        ChangeCommand::Revert { change, account } => {
            let session = Session::open()?;
            let revert = session.engine.revert(ChangeId(change), AccountId(account))?;
            println!(
                "Created revert change {} at {}",
                revert.id,
                revert.current_revision.short()
            );
            session.close()
        }
    }
}
