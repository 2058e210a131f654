//! CLI argument parsing for the claims pipeline.
//!
//! Each pipeline stage is its own subcommand so a run can be split: list the
//! matching attachments, extract them, then report from the saved run file.
use crate::config::BackendKind;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "crecon",
    version,
    about = "Extract and reconcile reinsurance claim statements from Outlook messages",
    after_help = "Examples:\n  crecon ingest --msg claims.msg\n  crecon extract --msg claims.msg --out run.json\n  crecon extract --msg claims.msg --lm 'llm -m gemini-2.0-flash -a {pdf}'\n  crecon report --run run.json\n  crecon exceptions --run run.json --json\n  crecon config init",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Config file (defaults to <config dir>/claims-recon/config.json)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log pipeline progress to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Ingest(IngestArgs),
    Extract(ExtractArgs),
    /// Summary table and exception queue from a saved run
    Report(RunArgs),
    /// Exception queue only, from a saved run
    Exceptions(RunArgs),
    Config(ConfigArgs),
}

/// Attachment selection shared by ingest and extract.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Outlook .msg file to read
    #[arg(long, value_name = "FILE")]
    pub msg: PathBuf,

    /// Case-insensitive attachment name pattern (regex)
    #[arg(long, value_name = "REGEX")]
    pub pattern: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "List the attachments that would be sent for extraction")]
pub struct IngestArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Write the matching attachments into this directory
    #[arg(long, value_name = "DIR")]
    pub save_dir: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Extract claim fields from each matching attachment")]
pub struct ExtractArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output path for the run JSON
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Model backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Local LM command (implies --backend command)
    #[arg(long, value_name = "CMD")]
    pub lm: Option<String>,

    /// Gemini model name
    #[arg(long, value_name = "NAME")]
    pub model: Option<String>,

    /// Emit the run as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Run JSON written by `extract --out`
    #[arg(long, value_name = "FILE")]
    pub run: PathBuf,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Create or inspect the config file")]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config (file, environment, defaults)
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        RootArgs::command().debug_assert();
    }

    #[test]
    fn parses_extract_with_command_backend() {
        let args = RootArgs::try_parse_from([
            "crecon",
            "extract",
            "--msg",
            "claims.msg",
            "--lm",
            "llm -a {pdf}",
            "--out",
            "run.json",
            "-v",
        ])
        .expect("parse args");
        assert!(args.verbose);
        match args.command {
            Command::Extract(extract) => {
                assert_eq!(extract.source.msg, PathBuf::from("claims.msg"));
                assert_eq!(extract.lm.as_deref(), Some("llm -a {pdf}"));
                assert_eq!(extract.out, Some(PathBuf::from("run.json")));
                assert!(extract.backend.is_none());
            }
            other => panic!("expected extract, got {other:?}"),
        }
    }

    #[test]
    fn backend_is_a_value_enum() {
        let args = RootArgs::try_parse_from([
            "crecon", "extract", "--msg", "a.msg", "--backend", "command",
        ])
        .expect("parse args");
        match args.command {
            Command::Extract(extract) => assert_eq!(extract.backend, Some(BackendKind::Command)),
            other => panic!("expected extract, got {other:?}"),
        }
        assert!(RootArgs::try_parse_from([
            "crecon", "extract", "--msg", "a.msg", "--backend", "openai",
        ])
        .is_err());
    }

    #[test]
    fn config_init_accepts_force() {
        let args =
            RootArgs::try_parse_from(["crecon", "config", "init", "--force"]).expect("parse args");
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { force },
            }) => assert!(force),
            other => panic!("expected config init, got {other:?}"),
        }
    }
}
