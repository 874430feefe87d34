use anyhow::{Context, Result};
use argp::FromArgs;
use check_pr_core::naming::generate_instance_name;
use check_pr_runner::process::{Cmd, CommandRunner, SystemRunner};

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Print a fresh instance name attributed to the signed-in user.
#[argp(subcommand, name = "name")]
pub struct Args {
    #[argp(option)]
    /// owner to attribute the instance to (default: signed-in user's mail nickname)
    owner: Option<String>,
}

pub async fn run(args: Args) -> Result<()> {
    let owner = match args.owner {
        Some(owner) => owner,
        None => signed_in_nickname(&SystemRunner).await?,
    };
    println!("{}", generate_instance_name(&owner));
    Ok(())
}

/// Mail nickname of the identity the `az` CLI is signed in as.
pub async fn signed_in_nickname<R: CommandRunner>(runner: &R) -> Result<String> {
    let cmd = Cmd::new("looking up signed-in user", "az", &std::env::temp_dir())
        .args(["ad", "signed-in-user", "show", "--query", "mailNickname", "-o", "tsv"]);
    let output = runner.output(&cmd).await.context("Failed to query the signed-in user")?;
    let nickname = output.trim();
    if nickname.is_empty() {
        anyhow::bail!("Signed-in user has no mail nickname");
    }
    Ok(nickname.to_string())
}
