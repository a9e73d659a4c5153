//! Stage and command definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named phase of a build job.
///
/// The declaration order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Init,
    Install,
    Build,
    Test,
    AfterTest,
    Notify,
}

impl StageKind {
    /// Stages made of shell commands, in execution order.
    pub const COMMAND_STAGES: [StageKind; 5] = [
        StageKind::Init,
        StageKind::Install,
        StageKind::Build,
        StageKind::Test,
        StageKind::AfterTest,
    ];

    /// Section name of this stage in a build manifest.
    pub fn manifest_key(self) -> &'static str {
        match self {
            StageKind::Init => "init",
            StageKind::Install => "install",
            StageKind::Build => "build_script",
            StageKind::Test => "test_script",
            StageKind::AfterTest => "after_test",
            StageKind::Notify => "notifications",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Init => "init",
            StageKind::Install => "install",
            StageKind::Build => "build",
            StageKind::Test => "test",
            StageKind::AfterTest => "after-test",
            StageKind::Notify => "notify",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shell a command line is handed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    /// `sh` on Unix, `cmd` on Windows.
    #[default]
    Platform,
    Sh,
    Cmd,
    Pwsh,
}

impl Shell {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sh" | "bash" => Some(Shell::Sh),
            "cmd" => Some(Shell::Cmd),
            "ps" | "pwsh" | "powershell" => Some(Shell::Pwsh),
            "platform" | "default" => Some(Shell::Platform),
            _ => None,
        }
    }

    /// Program and leading arguments; the script is appended as the last argument.
    pub fn invocation(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Platform if cfg!(windows) => ("cmd", &["/C"]),
            Shell::Platform | Shell::Sh => ("sh", &["-c"]),
            Shell::Cmd => ("cmd", &["/C"]),
            Shell::Pwsh => ("pwsh", &["-NoProfile", "-NonInteractive", "-Command"]),
        }
    }
}

/// One shell invocation of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command line, before variable interpolation.
    pub script: String,
    pub shell: Shell,
    /// Skip the command when this path exists. Makes provisioning idempotent.
    pub unless_exists: Option<String>,
}

impl Command {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            shell: Shell::default(),
            unless_exists: None,
        }
    }

    pub fn unless_exists(mut self, path: impl Into<String>) -> Self {
        self.unless_exists = Some(path.into());
        self
    }
}

/// Commands of every command stage of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub init: Vec<Command>,
    pub install: Vec<Command>,
    pub build: Vec<Command>,
    pub test: Vec<Command>,
    pub after_test: Vec<Command>,
}

impl StagePlan {
    pub fn commands(&self, stage: StageKind) -> &[Command] {
        match stage {
            StageKind::Init => &self.init,
            StageKind::Install => &self.install,
            StageKind::Build => &self.build,
            StageKind::Test => &self.test,
            StageKind::AfterTest => &self.after_test,
            StageKind::Notify => &[],
        }
    }

    pub fn commands_mut(&mut self, stage: StageKind) -> Option<&mut Vec<Command>> {
        match stage {
            StageKind::Init => Some(&mut self.init),
            StageKind::Install => Some(&mut self.install),
            StageKind::Build => Some(&mut self.build),
            StageKind::Test => Some(&mut self.test),
            StageKind::AfterTest => Some(&mut self.after_test),
            StageKind::Notify => None,
        }
    }

    /// Command stages in execution order with their commands.
    pub fn iter(&self) -> impl Iterator<Item = (StageKind, &[Command])> {
        StageKind::COMMAND_STAGES
            .into_iter()
            .map(move |stage| (stage, self.commands(stage)))
    }

    pub fn total_commands(&self) -> usize {
        self.iter().map(|(_, cmds)| cmds.len()).sum()
    }
}
