use argh::SubCommand;
use bitflags::bitflags;
use xshell::Cmd;

/// Trait for preparing a subcommand to be run.
pub trait Prepare {
    /// Returns the commands that make up this subcommand, in the order they
    /// should run.
    fn prepare<'a>(&self, sh: &'a xshell::Shell, flags: Flag) -> Vec<PreparedCommand<'a>>;
}

bitflags! {
    /// Flags that modify how commands are run.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Flag: u32 {
        /// Forces certain checks to continue running even if they hit an error.
        const KEEP_GOING = 1 << 0;
    }
}

/// A command with associated metadata, created from a command that implements
/// [`Prepare`].
pub struct PreparedCommand<'a> {
    /// The name of the command.
    pub name: &'static str,

    /// The command to execute.
    pub command: Cmd<'a>,

    /// The message to display if the test command fails.
    pub failure_message: &'static str,

    /// Environment variables that need to be set before the test runs.
    pub env_vars: Vec<(&'static str, &'static str)>,
}

impl<'a> PreparedCommand<'a> {
    /// Creates a new [`PreparedCommand`] from a [`Cmd`] and a failure message.
    ///
    /// The other fields of the command can be set with the `with_*` builder
    /// methods.
    pub fn new<T: SubCommand>(command: Cmd<'a>, failure_message: &'static str) -> Self {
        Self {
            command,
            name: T::COMMAND.name,
            failure_message,
            env_vars: vec![],
        }
    }

    /// Sets an environment variable for the duration of the command.
    pub fn with_env_var(mut self, key: &'static str, value: &'static str) -> Self {
        self.env_vars.push((key, value));
        self
    }
}
