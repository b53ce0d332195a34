use std::path::PathBuf;

use clap::Parser;

/// A multi-priority, deduplicating render-request scheduler for
/// slippy-map tile rendering (spec §6.3).
#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Path to the INI configuration file.
    #[arg(short, long, default_value = "/etc/renderd.conf")]
    pub config: PathBuf,
    /// Stay attached to the controlling terminal instead of daemonizing.
    #[arg(short, long, default_value_t)]
    pub foreground: bool,
    /// Which configured `[renderd<N>]` section this instance is.
    #[arg(short, long, default_value_t = 0)]
    pub slave: u32,
}
