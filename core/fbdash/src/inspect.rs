//! One-shot diagnostic subcommands.

use std::path::Path;

use chrono::Utc;
use fbdash_core::brokerage::access;
use fbdash_core::{
    list_workers, local_hostname, resolve_pool, validate_brokerage_path, Brokerage,
    DashboardConfig, BROKERAGE_ENV_VAR,
};

fn hostname() -> Result<String, String> {
    local_hostname().ok_or_else(|| "Unable to determine the host name".to_string())
}

/// Resolves the local host's pool and prints its live workers, one per line.
pub fn workers(config: &DashboardConfig) -> Result<(), String> {
    let brokerage = Brokerage::from_env(config);
    let hostname = hostname()?;
    let now = Utc::now();

    let pool = resolve_pool(brokerage.path().as_deref(), &hostname, now)
        .map_err(|e| e.to_string())?;
    let workers = list_workers(&pool, now);

    eprintln!("pool: {}", pool.display());
    eprintln!("live workers: {}", workers.len());
    for worker in workers {
        println!("{}", worker);
    }
    Ok(())
}

/// Prints the access-list decision for this host.
pub fn policy(config: &DashboardConfig) -> Result<(), String> {
    let brokerage = Brokerage::from_env(config);
    let hostname = hostname()?;
    let decision = access::evaluate(brokerage.path().as_deref(), &hostname);

    match decision.desired_mode() {
        Some(mode) => println!("{}: force {}", hostname, mode),
        None => println!("{}: no override", hostname),
    }
    Ok(())
}

/// Prints the resolved configuration and validates the brokerage path.
pub fn check_config(config: &DashboardConfig, config_path: &Path) -> Result<(), String> {
    let env_override = std::env::var_os(BROKERAGE_ENV_VAR).is_some();
    let brokerage = Brokerage::from_env(config);

    println!("config file:        {}", config_path.display());
    println!(
        "brokerage:          {} ({})",
        brokerage
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unset>".to_string()),
        if env_override { BROKERAGE_ENV_VAR } else { "config" }
    );
    println!("discovery interval: {}s", config.discovery_interval_secs);
    println!("status tick:        {}ms", config.status_tick_ms);
    println!("update interval:    {}s", config.update_interval_secs);
    println!("replace strategy:   {:?}", config.replace_strategy);

    match brokerage.path() {
        Some(path) => validate_brokerage_path(&path),
        None => Ok(()),
    }
}
