use clap::{Parser, Subcommand, ValueEnum};

use crate::platform::PlatformId;

#[derive(Parser, Debug)]
#[command(
    name = "botprobe",
    about = "Acceptance tester for chat bots on Messenger, Instagram Direct and Line",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in, or probe one platform with a response type
    Run {
        /// fb, ig or line
        platform: PlatformId,

        /// "login" to establish a session, otherwise a response type (e.g. A, B)
        target: String,

        /// Override the platform's probe input
        #[arg(long)]
        probe: Option<String>,
    },

    /// Probe every platform concurrently without operator input
    Trigger {
        /// Response type (e.g. A, B)
        response_type: String,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the HTTP trigger endpoint
    Serve {
        /// Address to bind, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Delete the saved session for a platform
    Logout {
        /// fb, ig or line
        platform: PlatformId,
    },

    /// Show project configuration
    Config {
        /// Emit machine-readable JSON output
        #[arg(long)]
        json: bool,
    },

    /// Generate a shell completion script
    Completions {
        /// Shell to generate completions for
        shell: CompletionShell,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

/// What `run <platform> <target>` asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    Login,
    Probe(String),
}

impl RunTarget {
    pub fn parse(target: &str) -> Self {
        if target.eq_ignore_ascii_case("login") {
            Self::Login
        } else {
            Self::Probe(target.to_string())
        }
    }
}
