use clap::Args;

use gavel_core::id::{AccountId, ChangeId};

use crate::session::Session;

#[derive(Args)]
pub struct SubmitArgs {
    /// Change to submit
    change: u32,
    /// Acting account id
    #[arg(long, default_value_t = 1)]
    account: u32,
}

pub fn run(args: SubmitArgs) -> anyhow::Result<()> {
    let session = Session::open()?;
    let id = ChangeId(args.change);
    session.engine.submit(id, AccountId(args.account))?;
    session.engine.wait_idle();

    let change = session.engine.context().changes.get(id)?;
    println!("Change {} is now {:?}", change.id, change.status);
    session.close()
}
