use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use hearth_config::{ConfigLoader, HearthConfig, WarningSeverity};
use hearth_core::HearthError;
use hearth_host::coordinator::{Candidate, plan};
use hearth_host::{inspect, list_archives};

mod run;

/// Hearth: a hot-reloading module host with sandboxed lifecycles
#[derive(Parser)]
#[command(name = "hearth", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to hearth.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host and load every module bundle
    Run {
        /// Override host.modules_dir
        #[arg(long)]
        modules_dir: Option<PathBuf>,
        /// Run without the interactive console (stop with Ctrl-C)
        #[arg(long)]
        no_console: bool,
    },
    /// Read a module bundle's manifest without loading it
    Inspect {
        /// Path to the bundle directory
        bundle: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List bundles in the modules directory in load order
    Modules,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Audit configuration
    Doctor,
    /// Show version and build info
    Version,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> hearth_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug".to_string()
        } else if self.quiet {
            "error".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone())
        };
        init_tracing(&config.logging.format, &log_level);

        match self.command {
            Commands::Run {
                modules_dir,
                no_console,
            } => {
                let mut config = config;
                if let Some(dir) = modules_dir {
                    config.host.modules_dir = dir;
                }
                run::cmd_run(&config_loader, config, no_console).await
            }
            Commands::Inspect { bundle, json } => Self::cmd_inspect(&bundle, json),
            Commands::Modules => Self::cmd_modules(config),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(config),
            Commands::Version => Self::cmd_version(),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_inspect(bundle: &Path, json: bool) -> hearth_core::Result<()> {
        let meta = inspect(bundle).map_err(|e| e.into_error(bundle))?;
        if json {
            let value = serde_json::json!({
                "name": meta.name,
                "main": meta.main,
                "version": meta.version,
                "description": meta.description,
                "depends": meta.depends,
                "checksum": meta.checksum,
                "commands": meta.commands,
                "permissions": meta.permissions,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        println!("{} v{}", meta.name, meta.version);
        println!("   Main: {}", meta.main);
        if !meta.description.is_empty() {
            println!("   Description: {}", meta.description);
        }
        if !meta.depends.is_empty() {
            println!("   Depends: {}", meta.depends.join(", "));
        }
        if let Some(checksum) = &meta.checksum {
            println!("   Checksum: {}", checksum);
        }
        for command in &meta.commands {
            let aliases = if command.aliases.is_empty() {
                String::new()
            } else {
                format!(" (aliases: {})", command.aliases.join(", "))
            };
            println!("   Command: {}{}", command.name, aliases);
        }
        for permission in &meta.permissions {
            println!("   Permission: {} [{:?}]", permission.name, permission.default);
        }
        Ok(())
    }

    fn cmd_modules(config: HearthConfig) -> hearth_core::Result<()> {
        let dir = &config.host.modules_dir;
        let mut candidates = Vec::new();
        let mut unreadable = 0;
        for archive in list_archives(dir)? {
            match inspect(&archive) {
                Ok(metadata) => candidates.push(Candidate { archive, metadata }),
                Err(e) => {
                    unreadable += 1;
                    println!("  ✗ {}: {}", archive.display(), e);
                }
            }
        }

        let plan = plan(
            candidates,
            &HashSet::new(),
            config.host.ignore_failed_dependencies,
        );
        println!("Modules in {}", dir.display());
        for (i, layer) in plan.layers.iter().enumerate() {
            for candidate in layer {
                println!(
                    "  [{}] {:<24} v{:<10} {}",
                    i,
                    candidate.name(),
                    candidate.metadata.version,
                    candidate.archive.display()
                );
            }
        }
        for (candidate, err) in &plan.rejected {
            println!("  ✗ {} [{}]: {}", candidate.name(), err.kind(), err);
        }
        println!();
        println!(
            "  {} loadable, {} rejected, {} unreadable",
            plan.layers.iter().map(Vec::len).sum::<usize>(),
            plan.rejected.len(),
            unreadable
        );
        Ok(())
    }

    fn cmd_config(config: HearthConfig, json: bool) -> hearth_core::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config)
                    .map_err(|e| HearthError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config: HearthConfig) -> hearth_core::Result<()> {
        println!("Hearth Doctor: configuration audit");
        println!();

        let warnings = match config.validate() {
            Ok(w) => w,
            Err(e) => {
                println!("{}", e);
                return Ok(());
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {}", w);
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                _ => {}
            }
        }

        // Filesystem checks beyond schema validation
        let mut ok = 0;
        let dir = &config.host.modules_dir;
        if dir.is_dir() {
            let bundles = list_archives(dir).map(|a| a.len()).unwrap_or(0);
            println!("  ✅ host.modules_dir: {} bundle(s) in {}", bundles, dir.display());
            ok += 1;
        } else {
            println!(
                "  💡 host.modules_dir: {} does not exist yet, it is created on first run",
                dir.display()
            );
            info_count += 1;
        }

        let unreadable: Vec<_> = list_archives(dir)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| inspect(&a).err().map(|e| (a, e)))
            .collect();
        if unreadable.is_empty() {
            ok += 1;
        }
        for (archive, err) in &unreadable {
            println!("  ⚠️  {}: {}", archive.display(), err);
            warn_count += 1;
        }

        println!();
        println!(
            "  ✅ {} checks passed, ⚠️  {} warnings, 💡 {} suggestions",
            ok, warn_count, info_count
        );
        Ok(())
    }

    fn cmd_version() -> hearth_core::Result<()> {
        println!("Hearth v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: {}", "2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        println!(
            "   WASM modules: {}",
            if cfg!(feature = "wasm") { "enabled" } else { "disabled" }
        );
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> hearth_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "hearth", &mut std::io::stdout());
        Ok(())
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
fn init_tracing(format: &str, level: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .init(),
    }
}
