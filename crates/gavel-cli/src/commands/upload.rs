use clap::Args;

use gavel_core::hash::blob_id;
use gavel_core::id::{AccountId, ChangeId};

use crate::session::Session;

#[derive(Args)]
pub struct UploadArgs {
    /// Project the change belongs to
    #[arg(long)]
    project: String,
    /// Destination branch (short name)
    #[arg(long, default_value = "main")]
    branch: String,
    /// Commit message
    #[arg(long, short)]
    message: String,
    /// Uploader account id
    #[arg(long, default_value_t = 1)]
    account: u32,
    /// File edit as path=content; repeatable
    #[arg(long = "set", value_name = "PATH=CONTENT")]
    sets: Vec<String>,
    /// File deletion by path; repeatable
    #[arg(long = "delete", value_name = "PATH")]
    deletes: Vec<String>,
    /// Upload as a new patch set of this change instead of a new change
    #[arg(long)]
    change: Option<u32>,
    /// Base the commit on another change's current revision
    #[arg(long)]
    parent: Option<u32>,
    /// Topic grouping related changes
    #[arg(long)]
    topic: Option<String>,
}

pub fn run(args: UploadArgs) -> anyhow::Result<()> {
    let session = Session::open()?;
    let ctx = session.engine.context();
    let dest = format!("heads/{}", args.branch);
    let repo = ctx.repos.open(&args.project);

    // Base tree: an explicit parent change, otherwise the branch tip.
    let (base, mut tree) = match args.parent {
        Some(parent_id) => {
            let parent = ctx.changes.get(ChangeId(parent_id))?;
            let commit = repo.load_commit(&parent.current_revision)?;
            (parent.current_revision, commit.tree)
        }
        None => match repo.resolve_ref(&dest) {
            Some(tip) => (tip, repo.load_commit(&tip)?.tree),
            None => anyhow::bail!("branch {} not found in '{}'", dest, args.project),
        },
    };

    for edit in &args.sets {
        let (path, content) = edit
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--set expects PATH=CONTENT, got '{edit}'"))?;
        tree.insert(path.to_string(), blob_id(content.as_bytes()));
    }
    for path in &args.deletes {
        if tree.remove(path).is_none() {
            anyhow::bail!("--delete: path '{path}' not present in base tree");
        }
    }

    let account = AccountId(args.account);
    let change = match args.change {
        Some(id) => session.engine.upload_patch_set(
            ChangeId(id),
            account,
            vec![base],
            tree,
            &args.message,
        )?,
        None => session.engine.upload_change(
            &args.project,
            &dest,
            account,
            vec![base],
            tree,
            &args.message,
        )?,
    };
    if let Some(topic) = args.topic {
        ctx.changes.atomic_update(change.id, |c| {
            c.topic = Some(topic);
            true
        })?;
    }
    println!(
        "Change {} patch set {} at {}",
        change.id,
        change.current_patch_set,
        change.current_revision.short()
    );
    session.close()
}
