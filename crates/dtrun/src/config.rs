use crate::cli::EngineArgs;
use dyntrans::Config;
use eyre_pretty::{Context, Result};
use std::path::Path;

/// Reads engine settings from a RON file. Missing fields keep their
/// defaults.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;

    ron::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

/// Applies command line overrides on top of `config`.
pub fn merge(mut config: Config, args: &EngineArgs) -> Config {
    if let Some(max) = args.max_instructions {
        config.max_instructions = max;
    }

    if let Some(entries) = args.tlb_entries {
        config.tlb_entries = entries;
    }

    if let Some(pages) = args.cache_pages {
        config.cache_pages = pages;
    }

    config.combine &= !args.no_combine;
    config.shortcut &= !args.no_shortcut;

    config
}
