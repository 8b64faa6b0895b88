//! Diagnostics command - displays system and daemon environment information

use std::path::Path;

use anyhow::Result;
use sysinfo::System;

use apiaryd::config::Configuration;
use apiaryd::registry::BotRegistry;

/// Run diagnostics and display system information
pub async fn run(config_path: &str) -> Result<()> {
    println!("Apiary Daemon Diagnostics");
    println!("=========================\n");

    println!("System Information:");
    println!("-------------------");

    let mut sys = System::new_all();
    sys.refresh_all();

    println!(
        "  OS: {} {}",
        System::name().unwrap_or_default(),
        System::os_version().unwrap_or_default()
    );
    println!("  Kernel: {}", System::kernel_version().unwrap_or_default());
    println!("  Hostname: {}", System::host_name().unwrap_or_default());
    println!("  CPUs: {}", sys.cpus().len());
    println!("  Total Memory: {} MB", sys.total_memory() / 1024 / 1024);
    println!("  Used Memory: {} MB", sys.used_memory() / 1024 / 1024);

    println!("\nConfiguration:");
    println!("--------------");

    let config = Configuration::load(Some(Path::new(config_path)))?;
    println!("  API: {}:{}", config.api.host, config.api.port);
    println!("  Bots directory: {}", config.system.bots_directory.display());
    println!(
        "    exists: {}",
        config.system.bots_directory.is_dir()
    );
    println!("  Registry file: {}", config.system.registry_file.display());
    println!("  Incident log: {}", config.system.incident_log_file.display());
    println!(
        "  Container storage: {}",
        config.system.container_storage_dir.display()
    );
    println!("  Isolation level: {}", config.monitoring.isolation_level);
    println!("  Memory threshold: {} MB", config.monitoring.memory_threshold_mb);
    println!("  CPU threshold: {}%", config.monitoring.cpu_threshold_percent);
    println!(
        "  Supervisor interval: {}s (max {} heal failures)",
        config.monitoring.health_check_interval_sec, config.monitoring.max_heal_failures
    );

    println!("\nRegistry:");
    println!("---------");

    let registry = BotRegistry::new(&config.system.registry_file);
    let stats = registry.get_registry_stats();
    println!("  Total bots: {}", stats.total_bots);
    println!("  Active bots: {}", stats.active_bots);
    println!("  Failed bots: {}", stats.failed_bots);
    for (status, count) in &stats.bots_by_status {
        println!("    {}: {}", status, count);
    }

    Ok(())
}
