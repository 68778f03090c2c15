//! CLI argument parsing for interpose

use crate::config::TraceConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for call traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented, colored text (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

/// When to color the text trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    pub fn choice(self) -> termcolor::ColorChoice {
        match self {
            Self::Auto if std::io::IsTerminal::is_terminal(&std::io::stderr()) => termcolor::ColorChoice::Auto,
            Self::Auto | Self::Never => termcolor::ColorChoice::Never,
            Self::Always => termcolor::ColorChoice::Always,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "interpose")]
#[command(version)]
#[command(about = "Trace calls made by a script through hooked host objects", long_about = None)]
pub struct Cli {
    /// Trace native bindings (process.binding)
    #[arg(
        short = 'b',
        long = "binding",
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub binding: Option<bool>,

    /// Trace modules (require)
    #[arg(
        short = 'm',
        long = "module",
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub module: Option<bool>,

    /// Trace globals
    #[arg(
        short = 'g',
        long = "global",
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub global: Option<bool>,

    /// Trace callbacks passed into traced calls
    #[arg(
        short = 'a',
        long = "passed",
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub passed: Option<bool>,

    /// Trace values returned from traced calls
    #[arg(
        short = 'r',
        long = "ret",
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub ret: Option<bool>,

    /// Only hook names matching EXPR (e.g., -e path.** -e /^util/)
    #[arg(short = 'e', long = "hook", value_name = "EXPR")]
    pub hook: Vec<String>,

    /// Only print calls whose names match EXPR
    #[arg(short = 'p', long = "print", value_name = "EXPR")]
    pub print: Vec<String>,

    /// Show a per-name summary instead of individual calls
    #[arg(short = 'c', long = "summary")]
    pub summary: bool,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Color the text trace
    #[arg(long = "color", value_enum, default_value = "auto")]
    pub color: ColorMode,

    /// Attach up to N open calls to each event
    #[arg(long = "call-sites", value_name = "N")]
    pub call_sites: Option<usize>,

    /// Expose the engine to the script as __interpose__
    #[arg(short = 'z', long = "provide-global")]
    pub provide_global: bool,

    /// Read options from a TOML file before applying flags
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,

    /// Script to run
    #[arg(value_name = "SCRIPT")]
    pub script: PathBuf,

    /// Arguments exposed to the script as process.argv
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Apply flags on top of `config`
    pub fn merge_into(&self, mut config: TraceConfig) -> TraceConfig {
        let flags = &mut config.trace;
        let overrides = [
            (&mut flags.binding, self.binding),
            (&mut flags.module, self.module),
            (&mut flags.global, self.global),
            (&mut flags.passed, self.passed),
            (&mut flags.ret, self.ret),
        ];
        for (slot, flag) in overrides {
            if let Some(enabled) = flag {
                *slot = enabled;
            }
        }
        config.hook.extend(self.hook.iter().cloned());
        config.print.extend(self.print.iter().cloned());
        if self.call_sites.is_some() {
            config.call_sites = self.call_sites;
        }
        config.provide_global |= self.provide_global;
        config
    }
}
