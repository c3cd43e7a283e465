//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// codeswarm - multi-worker coding-agent orchestrator
#[derive(Parser)]
#[command(
    name = "codeswarm",
    about = "Dispatch development tasks to a swarm of coding-assistant workers",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Start the coordinator and run until interrupted
    Start {
        /// Override the configured worker count
        #[arg(short = 'n', long)]
        workers: Option<u32>,

        /// Host assistant panes in this tmux session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Add a single task to the queue
    Add {
        /// Task description for the assistant
        description: String,

        /// Priority 1-10, higher first
        #[arg(short, long, default_value_t = 5)]
        priority: i32,

        /// Task ids this task depends on
        #[arg(short, long, value_delimiter = ',')]
        deps: Vec<String>,

        /// Explicit task id
        #[arg(long)]
        id: Option<String>,
    },

    /// Add a batch of tasks from a planner JSON file
    BatchAdd {
        /// Path to an analysis-result JSON document
        file: PathBuf,
    },

    /// List queued tasks
    List {
        /// Filter by status (pending, in_progress, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show queue summary
    Status,

    /// Remove finished tasks from the queue
    Clear {
        /// What to remove: completed, failed, or all
        #[arg(default_value = "completed")]
        filter: String,
    },

    /// Check that the required external tools are available
    Doctor,
}

/// Result of checking a required tool.
pub struct ToolCheck {
    pub name: &'static str,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    /// Check if a tool is available and get its version.
    pub fn check(name: &'static str, version_args: &[&str]) -> Self {
        let result = std::process::Command::new(name).args(version_args).output();

        match result {
            Ok(output) if output.status.success() => {
                let version_str = String::from_utf8_lossy(&output.stdout);
                Self {
                    name,
                    available: true,
                    version: Some(parse_version(&version_str)),
                }
            }
            _ => Self {
                name,
                available: false,
                version: None,
            },
        }
    }
}

/// Parse version from command output (extracts the first version-like string)
fn parse_version(output: &str) -> String {
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    "unknown".to_string()
}

/// Check the tools the coordinator shells out to.
pub fn check_required_tools() -> Vec<ToolCheck> {
    vec![
        ToolCheck::check("git", &["--version"]),
        ToolCheck::check("tmux", &["-V"]),
        ToolCheck::check("sh", &["-c", "true"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() {
        let cli = Cli::parse_from(["codeswarm", "start", "-n", "4", "--session", "swarm"]);
        match cli.command {
            Command::Start { workers, session } => {
                assert_eq!(workers, Some(4));
                assert_eq!(session.as_deref(), Some("swarm"));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_parse_add_with_deps() {
        let cli = Cli::parse_from(["codeswarm", "add", "write tests", "-p", "8", "-d", "task-1,task-2"]);
        match cli.command {
            Command::Add {
                description,
                priority,
                deps,
                id,
            } => {
                assert_eq!(description, "write tests");
                assert_eq!(priority, 8);
                assert_eq!(deps, vec!["task-1", "task-2"]);
                assert!(id.is_none());
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_parse_list_with_status() {
        let cli = Cli::parse_from(["codeswarm", "list", "--status", "pending"]);
        match cli.command {
            Command::List { status } => assert_eq!(status.as_deref(), Some("pending")),
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_parse_clear_default() {
        let cli = Cli::parse_from(["codeswarm", "clear"]);
        match cli.command {
            Command::Clear { filter } => assert_eq!(filter, "completed"),
            _ => panic!("expected clear"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["codeswarm", "-c", "/etc/codeswarm.yml", "status"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/codeswarm.yml")));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("git version 2.43.0"), "2.43.0");
        assert_eq!(parse_version("tmux 3.4"), "3.4");
        assert_eq!(parse_version("v1.2.3"), "1.2.3");
        assert_eq!(parse_version("no digits here"), "unknown");
    }

    #[test]
    fn test_tool_check_missing_tool() {
        let check = ToolCheck::check("definitely-not-a-real-binary", &["--version"]);
        assert!(!check.available);
        assert!(check.version.is_none());
    }
}
