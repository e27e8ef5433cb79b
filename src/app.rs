//! Application orchestrator.
//! Loads/merges config, initializes logging, installs the signal handler,
//! builds the component context, and runs the daemon (or a one-shot surface).

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::cli::Args;
use crate::config::{self, LoadResult, default_config_path};
use crate::context::AppContext;
use crate::dispatch::ShutdownMode;
use crate::logging::init_tracing;
use crate::output as out;
use crate::route;
use crate::shutdown;

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    // Handle --print-config before logging init
    if args.print_config {
        print_config_location();
        return Ok(());
    }

    // Create a template config if none exists (before logging init). Explicit
    // --config paths are expected to exist.
    let cfg_path = match &args.config {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            path.clone()
        }
        None => match config::load_or_init()? {
            LoadResult::CreatedTemplate(path) => {
                out::print_success(&format!(
                    "A template sluice config was written to: {}",
                    path.display()
                ));
                out::print_info(
                    "Edit it to set your watch directories and rules, then re-run. \
                     To use a different location set SLUICE_CONFIG.",
                );
                return Ok(());
            }
            LoadResult::Present(path) => path,
        },
    };

    let mut cfg = config::load_config(&cfg_path)?;
    args.apply_overrides(&mut cfg);

    // Preview needs the compiled rules but no running pipeline, and must work
    // even when watch directories are absent on this machine.
    if let Some(path) = &args.preview {
        return preview(&cfg, path);
    }

    // Initialize logging and capture the guard so it can be dropped on signal
    let guard_opt = init_tracing(&cfg.log_level, cfg.log_file.as_deref(), args.json)
        .map_err(|e| {
            out::print_error(&format!("Failed to initialize logging: {e}"));
            e
        })?;
    let guard_slot = Arc::new(Mutex::new(guard_opt));
    {
        let guard_slot = Arc::clone(&guard_slot);
        ctrlc::set_handler(move || {
            shutdown::request();
            out::print_warn("Received interrupt; shutting down gracefully...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take(); // drop guard here to flush tracing_appender
            }
        })
        .context("failed to install signal handler")?;
    }

    debug!("Starting sluice: {:?}", args);

    let result = (|| -> Result<()> {
        config::validate(&mut cfg)?;
        // The binary ships no remote protocol backend; sync stays library-only.
        let ctx = AppContext::build(cfg, None)?;
        if args.once {
            run_once(ctx)
        } else {
            run_daemon(ctx)
        }
    })();

    // Ensure logs are flushed before exit
    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }
    result
}

/// Daemon mode: idle until a shutdown is requested, then drain and stop.
fn run_daemon(ctx: AppContext) -> Result<()> {
    info!(
        watch_dirs = ctx.config.watch_dirs.len(),
        rules = !ctx.config.rules.is_empty(),
        "sluice running"
    );
    while !shutdown::is_requested() {
        std::thread::sleep(Duration::from_millis(200));
    }
    ctx.teardown(ShutdownMode::Drain)
}

/// One-shot mode: a single stability sweep over whatever the startup scan
/// found, then a draining teardown. Files still settling are left in place.
fn run_once(ctx: AppContext) -> Result<()> {
    info!(tracked = ctx.tracked_paths(), "one-shot sweep");
    ctx.tracker.poll_once();
    ctx.teardown(ShutdownMode::Drain)
}

fn preview(cfg: &crate::config::Config, path: &PathBuf) -> Result<()> {
    match route::preview(&cfg.rules, path) {
        Some((rule, dest)) => {
            let op = route::preview_operator(&cfg.rules, path)
                .map(|o| o.name.clone())
                .unwrap_or_default();
            out::print_user(&format!(
                "{} -> rule '{}' ({}) -> {}",
                path.display(),
                rule,
                op,
                dest.display()
            ));
            Ok(())
        }
        None => {
            out::print_warn(&format!("No rule matches {}", path.display()));
            Ok(())
        }
    }
}

fn print_config_location() {
    if let Ok(cfg_env) = std::env::var("SLUICE_CONFIG") {
        out::print_info(&format!("Using SLUICE_CONFIG (explicit):\n  {cfg_env}\n"));
        out::print_info("To override, unset SLUICE_CONFIG or set it to another file.");
        return;
    }
    match default_config_path() {
        Ok(p) => {
            out::print_info(&format!("Default sluice config path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("A config file already exists at that location.");
            } else {
                out::print_info(
                    "No config file exists there yet. Run without --print-config to create a template.",
                );
            }
        }
        Err(e) => {
            out::print_error(&format!("Could not determine a default config path: {e}"));
        }
    }
}
