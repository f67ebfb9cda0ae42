use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use livepatch_core::config::TomlValue;
use livepatch_core::config::parse_override;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Replay and screen livepatch edit streams")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Override a pipeline setting, e.g. `-c min_dwell_ms=0`. May be repeated.
    #[arg(short = 'c', long = "config", value_name = "key=value", global = true)]
    pub raw_overrides: Vec<String>,

    /// Path to a livepatch.toml. Defaults to the one under the document root.
    #[arg(long = "config-file", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Specifies color settings for use in the output.
    #[arg(long = "color", value_enum, default_value_t = Color::Auto, global = true)]
    pub color: Color,
}

impl Cli {
    pub fn parse_overrides(&self) -> anyhow::Result<Vec<(String, TomlValue)>> {
        self.raw_overrides
            .iter()
            .map(|raw| parse_override(raw).map_err(anyhow::Error::from))
            .collect()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a recorded stream and review the edits it proposes.
    Replay(ReplayArgs),

    /// Screen a batch of proposed edits and print the frames a run would emit.
    Gate(GateArgs),
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Recorded event stream (`event:`/`data:` frames).
    #[arg(long, value_name = "FILE")]
    pub transcript: PathBuf,

    /// Directory that document paths are resolved against.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Document treated as open in the editor, relative to `--root`.
    #[arg(long, value_name = "PATH")]
    pub active: Option<String>,

    #[arg(long = "run-id", default_value = "replay")]
    pub run_id: String,

    /// Apply every pending suggestion once the run settles.
    #[arg(long = "accept-all", default_value_t = false)]
    pub accept_all: bool,

    /// Print one JSON object per line instead of a human summary.
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct GateArgs {
    /// JSON array of edits, either span pairs or line-addressed edits.
    #[arg(long, value_name = "FILE")]
    pub edits: PathBuf,

    /// The user's request; decides which edit kinds are permitted.
    #[arg(long, default_value = "")]
    pub request: String,

    /// Target assumed for edits that name none.
    #[arg(long = "current-file", value_name = "PATH")]
    pub current_file: Option<String>,

    /// Directory used to read documents for line-addressed edits.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum Color {
    Always,
    Never,
    #[default]
    Auto,
}
