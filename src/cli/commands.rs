// src/cli/commands.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Bitcoin mining supervisor - runs hashing backends against pools or a local node
#[derive(Parser, Debug)]
#[command(name = "miner-supervisor")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform (start mining or generate config)
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the supervisor
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Start mining sessions from configured profiles
    Start(StartOptions),

    /// Generate configuration file template
    Config(ConfigOptions),
}

/// Options for starting mining sessions
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Profile to run; repeat for several. Defaults to all autostart profiles
    #[arg(short, long = "profile")]
    pub profiles: Vec<String>,

    /// Log at debug level, including raw backend output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,
}
