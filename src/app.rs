//! Application orchestrator.
//! Loads config, applies CLI overrides, initializes logging, installs the signal
//! handler, then migrates each selected share and reports the outcome.

use anyhow::{Context, Result, anyhow, bail};
use std::fs;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use tier_move::cli::Args;
use tier_move::config::CONFIG_ENV;
use tier_move::output as out;
use tier_move::{
    Config, Mover, ProcessingLedger, Share, ShareSummary, TierMoveError, load_config_from_xml_path,
    migratable_shares, migrate_share, resolve_config_path, shutdown,
};

use crate::logging::init_tracing;

const EXAMPLE_CONFIG: &str = "<config>\n  <disk><name>disk1</name><path>/mnt/disk1</path></disk>\n  <pool><name>cache</name><path>/mnt/cache</path></pool>\n  <share>\n    <name>media</name>\n    <use_cache>yes</use_cache>\n    <cache_pool>cache</cache_pool>\n    <split_level>1</split_level>\n  </share>\n</config>\n";

fn print_config_location(args: &Args) {
    if args.config.is_none()
        && let Ok(cfg_env) = std::env::var(CONFIG_ENV)
    {
        out::print_info(&format!("Using {CONFIG_ENV} (explicit):\n  {cfg_env}\n"));
        out::print_info(&format!("To override, unset {CONFIG_ENV} or pass --config."));
        return;
    }
    match resolve_config_path(args.config.as_deref()) {
        Some(p) => {
            out::print_info(&format!("tier_move config path:\n  {}\n", p.display()));
            if p.exists() {
                out::print_info("A config file exists at that location.");
            } else {
                out::print_info("No config file exists there yet.");
            }
        }
        None => out::print_error("Could not determine a default config path"),
    }
}

fn load(args: &Args) -> Result<Config> {
    let Some(path) = resolve_config_path(args.config.as_deref()) else {
        bail!("no config path: pass --config or set {CONFIG_ENV}");
    };
    if !path.exists() {
        out::print_error(&format!("Config file not found: {}", path.display()));
        out::print_info(&format!(
            "Create it with your disks, pools and shares. Example:\n\n{EXAMPLE_CONFIG}"
        ));
        bail!("config file not found: {}", path.display());
    }
    let mut cfg = load_config_from_xml_path(&path)?;
    args.apply_overrides(&mut cfg);
    Ok(cfg)
}

fn select_shares(cfg: &Config, names: &[String]) -> Result<Vec<Arc<Share>>> {
    if names.is_empty() {
        return Ok(migratable_shares(&cfg.topology));
    }
    names
        .iter()
        .map(|n| cfg.topology.share(n).map_err(anyhow::Error::from))
        .collect()
}

fn report(summary: &ShareSummary, dry_run: bool) {
    let Some(direction) = summary.direction else {
        out::print_info(&format!("{}: cache mode 'no', skipped", summary.share));
        return;
    };
    let verb = if dry_run { "would move" } else { "moved" };
    let line = format!(
        "{} ({direction}): {verb} {}, failed {}, dropped {} of {} groups",
        summary.share, summary.moved, summary.failed, summary.dropped, summary.discovered
    );
    if summary.failed > 0 || summary.dropped > 0 {
        out::print_warn(&line);
    } else {
        out::print_success(&line);
    }
}

fn log_failure(share: &str, e: &anyhow::Error) {
    match e.downcast_ref::<TierMoveError>() {
        Some(tm) => error!(share, code = tm.code(), error = %tm, "share migration failed"),
        None => error!(share, error = %format!("{e:#}"), "share migration failed"),
    }
}

/// Run the CLI application.
pub fn run(args: Args) -> Result<()> {
    if args.print_config {
        print_config_location(&args);
        return Ok(());
    }

    let cfg = load(&args).inspect_err(|e| out::print_error(&format!("{e:#}")))?;

    let guard_opt = init_tracing(cfg.log_level, cfg.log_file.as_deref(), args.json).map_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
        e
    })?;

    // Dropped on SIGINT to flush the file appender.
    let guard_slot = Arc::new(Mutex::new(guard_opt));
    {
        let guard_slot = Arc::clone(&guard_slot);
        ctrlc::set_handler(move || {
            shutdown::request();
            out::print_warn("Received interrupt; finishing in-flight entities then stopping...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take();
            }
        })
        .map_err(|e| anyhow!("install signal handler: {e}"))?;
    }

    debug!(?args, "starting tier_move");

    let result = (|| -> Result<()> {
        let shares = select_shares(&cfg, &args.shares)?;
        let mover = Mover::new(cfg.move_options());
        let ledger = ProcessingLedger::new();
        let mut share_errors = 0usize;
        let mut failed = 0usize;

        for share in &shares {
            if shutdown::is_requested() {
                break;
            }
            match migrate_share(&cfg.topology, share, &mover, &ledger) {
                Ok(summary) => {
                    failed += summary.failed;
                    report(&summary, cfg.dry_run);
                }
                Err(e) => {
                    share_errors += 1;
                    log_failure(&share.name, &e);
                    out::print_error(&format!("{}: {e:#}", share.name));
                }
            }
        }

        if let Some(path) = &args.ledger {
            let body = ledger.to_json_lines()?;
            fs::write(path, body).with_context(|| format!("write ledger '{}'", path.display()))?;
            info!(path = %path.display(), entries = ledger.len(), "ledger written");
        }

        if shutdown::is_requested() {
            let e = TierMoveError::Interrupted;
            error!(code = e.code(), kind = "interrupted", "run aborted by user");
            return Err(e.into());
        }
        if share_errors > 0 || failed > 0 {
            bail!("{share_errors} share(s) failed, {failed} entit(ies) failed");
        }
        info!(shares = shares.len(), mutations = ledger.len(), "run complete");
        Ok(())
    })();

    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }

    result
}
