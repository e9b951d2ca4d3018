//! Command-line interface for the CIL importer.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "ilimport")]
#[command(about = "Import CIL method bodies into tree IR", long_about = None)]
pub struct Cli {
    /// Log filter (overrides `RUST_LOG`), e.g. `ilimport_importer=debug`
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Import methods and print their IR
    Import {
        /// JSON module file
        file: PathBuf,

        /// Import only this method
        #[arg(long)]
        method: Option<String>,

        /// Print the local table after each method
        #[arg(long)]
        locals: bool,

        /// Print import counters after each method
        #[arg(long)]
        stats: bool,

        #[command(flatten)]
        options: ImportOptions,
    },
    /// Print decoded instructions
    Disasm {
        /// JSON module file
        file: PathBuf,

        /// Disassemble only this method
        #[arg(long)]
        method: Option<String>,
    },
}

#[derive(Args)]
pub struct ImportOptions {
    /// Pointer width of the target
    #[arg(long, value_enum, conflicts_with = "target")]
    pub pointer_width: Option<PointerWidthArg>,

    /// Target triple, e.g. `i686-unknown-linux-gnu`
    #[arg(long)]
    pub target: Option<String>,

    /// Do not inline calls
    #[arg(long)]
    pub no_inline: bool,

    /// Do not fold operations on constants
    #[arg(long)]
    pub no_fold: bool,

    /// Do not fold box/unbox/isinst idioms
    #[arg(long)]
    pub no_box_patterns: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PointerWidthArg {
    #[value(name = "32")]
    W32,
    #[value(name = "64")]
    W64,
}
