//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Watch paint sources and re-export them as simulator liveries
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: refresher.toml)
    #[arg(short = 'C', long, global = true, default_value = "refresher.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Enable verbose output for debugging
    #[arg(short = 'V', long, global = true)]
    pub verbose: bool,

    /// Output directory (default: the paint's folder)
    #[arg(short, long, global = true, value_hint = clap::ValueHint::DirPath)]
    pub output: Option<PathBuf>,

    /// Customer id used in output file names
    #[arg(long, global = true)]
    pub id: Option<u32>,

    /// Write the paint as car_num_<id>.tga
    #[arg(long, global = true, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub custom_number: Option<bool>,

    /// Text appended to output file names after the id
    #[arg(long, global = true)]
    pub suffix: Option<String>,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Watch sources and refresh outputs on every change
    #[command(visible_alias = "w")]
    Watch {
        /// Paint source (.pdn, .psd, .svg)
        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        paint: Option<PathBuf>,

        /// Spec map source (.pdn, .psd, .svg)
        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        spec: Option<PathBuf>,

        /// Polling interval in milliseconds
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Convert one source once
    #[command(visible_alias = "c")]
    Convert {
        /// Source file
        #[arg(value_name = "PATH", value_hint = clap::ValueHint::FilePath)]
        path: PathBuf,

        /// Write the spec map instead of the paint
        #[arg(long)]
        spec: bool,
    },

    /// Print the structure of a document or output file
    #[command(visible_alias = "i")]
    Inspect {
        /// A .pdn document or a .tga output
        #[arg(value_name = "PATH", value_hint = clap::ValueHint::FilePath)]
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub const fn is_watch(&self) -> bool {
        matches!(self.command, Commands::Watch { .. })
    }
}
