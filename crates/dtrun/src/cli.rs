use clap::{Args, Parser};
use std::path::PathBuf;

fn parse_addr(value: &str) -> Result<u64, String> {
    let value = value.replace('_', "");
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };

    parsed.map_err(|e| format!("invalid address {value:?}: {e}"))
}

/// Engine tunables. Unset values come from the config file, if any, or the
/// engine defaults.
#[derive(Args, Debug)]
pub struct EngineArgs {
    /// Instruction budget of a single batch
    #[arg(long)]
    pub max_instructions: Option<u64>,
    /// Number of TLB entries per CPU
    #[arg(long)]
    pub tlb_entries: Option<usize>,
    /// Capacity of the translation cache, in pages
    #[arg(long)]
    pub cache_pages: Option<usize>,
    /// Whether to disable instruction combining
    #[arg(long, default_value_t = false)]
    pub no_combine: bool,
    /// Whether to disable the direct-mapped TLB shortcut
    #[arg(long, default_value_t = false)]
    pub no_shortcut: bool,
}

#[derive(Args, Debug)]
pub struct DebugArgs {
    /// Whether to log every executed instruction
    #[arg(long, default_value_t = false)]
    pub trace: bool,
    /// Whether to execute a single instruction per batch
    #[arg(long, default_value_t = false)]
    pub step: bool,
    /// Addresses to stop at. Can be repeated.
    #[arg(long = "break", value_parser = parse_addr)]
    pub breakpoints: Vec<u64>,
}

/// dtrun: runs raw little endian ARM images on the dyntrans engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the raw image to load.
    pub image: PathBuf,
    /// Address to load the image at.
    #[arg(long, default_value = "0", value_parser = parse_addr)]
    pub load_addr: u64,
    /// Address to start executing at. Defaults to the load address.
    #[arg(long, value_parser = parse_addr)]
    pub entry: Option<u64>,
    /// Size of RAM, which starts at address zero.
    #[arg(long, default_value = "0x1000000", value_parser = parse_addr)]
    pub ram_size: u64,
    /// Number of CPUs, all starting at the entry point
    #[arg(long, default_value_t = 1)]
    pub cpus: usize,
    /// Address of the console, a write-only byte port outside of RAM.
    #[arg(long, default_value = "0x10000000", value_parser = parse_addr)]
    pub console: u64,
    /// Maximum number of instructions to execute
    #[arg(long)]
    pub limit: Option<u64>,
    /// Maximum number of seconds to run for
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Path to a RON file with engine settings.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Path to a file to write logs to, instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    #[command(flatten)]
    pub engine: EngineArgs,
    #[command(flatten)]
    pub debug: DebugArgs,
}
