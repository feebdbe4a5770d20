// src/main.rs
use btc_miner_supervisor::{self, *};
use clap::Parser;
use tokio::runtime::Runtime;

/// Main entry point for the mining supervisor
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start_mining(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Runs the selected profiles until Ctrl-C
///
/// # Operations
/// 1. Initializes logging
/// 2. Loads and validates configuration
/// 3. Creates and starts one session per profile
/// 4. Logs session events until interrupted, then stops every session
fn start_mining(opts: cli::StartOptions) -> Result<(), MinerError> {
    if opts.verbose {
        utils::init_verbose_logging();
    } else {
        utils::init_logging();
    }

    let config = config::load(&opts.config)?;
    let profiles = select_profiles(&config, &opts.profiles)?;

    let rt = Runtime::new()?;
    rt.block_on(async {
        let manager = SessionManager::from_config(&config)?;
        let reporter =
            stats::EventReporter::new(manager.subscribe(), config.settings.backend.report_interval());
        reporter.start();

        for profile in profiles {
            let id = manager.create_session(profile)?;
            manager.start_session(id)?;
        }

        tokio::signal::ctrl_c().await?;
        log::info!("Interrupted, stopping sessions");
        manager.shutdown().await;
        Ok(())
    })
}

/// Picks the named profiles, or every autostart profile when none are named
fn select_profiles(
    config: &config::Config,
    names: &[String],
) -> Result<Vec<SessionConfig>, MinerError> {
    let profiles: Vec<SessionConfig> = if names.is_empty() {
        config.autostart_profiles().cloned().collect()
    } else {
        names
            .iter()
            .map(|name| {
                config
                    .profile(name)
                    .cloned()
                    .ok_or_else(|| MinerError::ConfigError(format!("No profile named '{}'", name)))
            })
            .collect::<Result<_, _>>()?
    };

    if profiles.is_empty() {
        return Err(MinerError::ConfigError(
            "No profiles to run: name one with --profile or mark profiles autostart".into(),
        ));
    }
    Ok(profiles)
}

/// Writes the configuration template to the requested file
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    std::fs::write(&opts.output, config::generate_template())?;
    println!("Wrote configuration template to {}", opts.output.display());
    Ok(())
}
