use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use hearth_config::{ConfigLoader, HearthConfig};
use hearth_host::{Admin, ModuleManager};
use tracing::warn;

pub(super) async fn cmd_run(
    loader: &ConfigLoader,
    config: HearthConfig,
    no_console: bool,
) -> hearth_core::Result<()> {
    println!("Hearth v{}", env!("CARGO_PKG_VERSION"));
    println!("   Modules: {}", config.host.modules_dir.display());
    println!("   Data: {}", config.host.data_dir.display());
    if config.sandbox.enabled {
        println!(
            "   Sandbox: on ({} ms limit, {} workers)",
            config.sandbox.max_execution_ms, config.sandbox.worker_threads
        );
    } else {
        println!("   Sandbox: off");
    }
    println!(
        "   Hot reload: {}",
        if config.hot_reload.enabled { "enabled" } else { "disabled" }
    );
    println!();

    let manager = ModuleManager::builder(config).build()?;
    let report = manager.start().await?;
    println!(
        "   Loaded {} module(s), {} failed",
        report.loaded.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        println!("   ✗ {} [{}]: {}", failure.module, failure.kind, failure.reason);
    }
    println!();

    // Sandbox and performance settings follow edits to the config file.
    let _config_watcher = if loader.path().exists() {
        let target = manager.clone();
        match loader.watch(move |reloaded| target.apply_config(reloaded)) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "config hot-reload unavailable");
                None
            }
        }
    } else {
        None
    };

    let admin = Admin::new(manager.clone());
    if no_console {
        println!("Press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    } else {
        console(&admin).await;
    }

    println!("Shutting down...");
    manager.shutdown().await;
    Ok(())
}

/// Read admin lines from stdin until `quit`, EOF or Ctrl-C.
async fn console(admin: &Admin) {
    println!("Type 'help' for commands, 'quit' to stop.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("\x1b[36mhearth>\x1b[0m ");
        std::io::stderr().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if matches!(trimmed, "quit" | "exit" | "stop") {
            break;
        }

        let output = admin.execute_line(trimmed).await;
        if !output.is_empty() {
            println!("{}", output);
        }
    }
}
