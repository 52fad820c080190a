use argh::FromArgs;
use xshell::cmd;

use crate::Flag;
use crate::Prepare;
use crate::PreparedCommand;

/// Model-checks the thread pool with loom. Slow; not part of the default run.
#[derive(FromArgs, Default)]
#[argh(subcommand, name = "loom")]
pub struct LoomCommand {}

impl Prepare for LoomCommand {
    fn prepare<'a>(&self, sh: &'a xshell::Shell, _flags: Flag) -> Vec<PreparedCommand<'a>> {
        vec![
            PreparedCommand::new::<Self>(
                cmd!(sh, "cargo test --profile loom --test loom"),
                "Please fix the interleavings reported in output above.",
            )
            .with_env_var("RUSTFLAGS", "--cfg loom"),
        ]
    }
}
