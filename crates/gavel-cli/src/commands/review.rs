use clap::Args;

use gavel_core::id::{AccountId, ChangeId};
use gavel_core::types::{Approval, ApprovalCategory};
use gavel_engine::context::now_ms;

use crate::session::Session;

#[derive(Args)]
pub struct ReviewArgs {
    /// Change to review
    change: u32,
    /// Approval category: code-review, submit or stage
    #[arg(long, default_value = "code-review")]
    category: String,
    /// Approval value; zero or negative withholds approval
    #[arg(long, default_value_t = 1, allow_hyphen_values = true)]
    value: i16,
    /// Reviewer account id
    #[arg(long, default_value_t = 1)]
    account: u32,
}

fn parse_category(s: &str) -> anyhow::Result<ApprovalCategory> {
    match s {
        "code-review" => Ok(ApprovalCategory::CodeReview),
        "submit" => Ok(ApprovalCategory::Submit),
        "stage" => Ok(ApprovalCategory::Stage),
        other => anyhow::bail!("unknown approval category '{other}'"),
    }
}

pub fn run(args: ReviewArgs) -> anyhow::Result<()> {
    let session = Session::open()?;
    let ctx = session.engine.context();
    let change = ctx.changes.get(ChangeId(args.change))?;
    let category = parse_category(&args.category)?;

    ctx.changes.upsert_approval(Approval {
        change_id: change.id,
        revision: change.current_revision,
        account: AccountId(args.account),
        category,
        value: args.value,
        granted_at_ms: now_ms(),
    });
    println!(
        "Recorded {}={} on change {} patch set {}",
        args.category, args.value, change.id, change.current_patch_set
    );
    session.close()
}
