pub mod models {
    pub mod dispenser;
}

pub mod fleet {
    pub mod classify;
    pub mod counts;
    pub mod distribution;
    pub mod merge;
    pub mod stats;
    pub mod view;
}

pub mod services {
    pub mod refresh;
    pub mod report;
}

pub mod cache;
pub mod client;
pub mod config;
pub mod env_file;

use crate::client::DispenserClient;
use crate::config::Config;
use crate::services::refresh::{self, RefreshOutcome, RefreshScope, Sources, Trigger};
use crate::services::report::{self, ReportOptions};
use chrono::Utc;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

#[derive(Debug, Default)]
struct CliArgs {
    env_file: Option<PathBuf>,
    once: bool,
}

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

fn parse_args<I: IntoIterator<Item = std::ffi::OsString>>(args: I) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let arg = arg.into_string().map_err(|_| "argument contains invalid UTF-8".to_string())?;
        let env_path = if arg == "--env-file" {
            let value = args
                .next()
                .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
            Some(PathBuf::from(value))
        } else if let Some(value) = arg.strip_prefix("--env-file=") {
            if value.is_empty() {
                return Err("`--env-file` requires a path argument".to_string());
            }
            Some(PathBuf::from(value))
        } else {
            match arg.as_str() {
                "--once" => parsed.once = true,
                "--" => break,
                other => return Err(format!("unrecognised argument: {}", other)),
            }
            None
        };

        if let Some(path) = env_path {
            if parsed.env_file.is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
            parsed.env_file = Some(path);
        }
    }
    Ok(parsed)
}

fn load_env(args: &CliArgs) -> Result<Option<LoadedEnvFile>, String> {
    let (path, explicit) = match &args.env_file {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            (path.clone(), true)
        }
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let default_path = cwd.join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };
    let applied = env_file::load(&path)?;
    Ok(Some(LoadedEnvFile { path, explicit, applied }))
}

fn load_cached_sources(cfg: &Config) -> Sources {
    if !cfg.cache_enabled {
        return Sources::default();
    }
    match cache::load(&cfg.cache_file) {
        Ok(Some(snapshot)) => {
            info!(
                "Loaded snapshot from {} (saved {})",
                cfg.cache_file.display(),
                snapshot.saved_at.to_rfc3339()
            );
            Sources::from_snapshot(snapshot)
        }
        Ok(None) => {
            info!("No snapshot at {}; starting empty", cfg.cache_file.display());
            Sources::default()
        }
        Err(e) => {
            warn!("Ignoring unreadable snapshot {}: {}", cfg.cache_file.display(), e);
            Sources::default()
        }
    }
}

fn save_snapshot(cfg: &Config, sources: &Sources, outcome: &RefreshOutcome) {
    if !cfg.cache_enabled || !outcome.any_updated() {
        return;
    }
    if let Err(e) = cache::save(&cfg.cache_file, &sources.to_snapshot(Utc::now())) {
        warn!("Saving snapshot to {} failed: {}", cfg.cache_file.display(), e);
    }
}

fn report_options(cfg: &Config) -> ReportOptions {
    ReportOptions {
        alert_filter: cfg.dashboard_alert_filter,
        search: cfg.dashboard_search.clone(),
    }
}

fn run(args: &CliArgs) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (api={}, refresh_interval={}s, request_timeout={}s, max_request_retries={}, cache={})",
        cfg.api_base_url,
        cfg.refresh_interval.as_secs(),
        cfg.request_timeout.as_secs(),
        cfg.max_request_retries.get(),
        if cfg.cache_enabled {
            cfg.cache_file.display().to_string()
        } else {
            "disabled".to_string()
        }
    );

    // 2) Init API client
    let client = DispenserClient::new(
        &cfg.api_base_url,
        &cfg.api_token,
        cfg.request_timeout,
        cfg.max_request_retries,
    );
    let options = report_options(&cfg);

    // 3) Last known state, shown until the first fetch lands
    let mut sources = load_cached_sources(&cfg);
    if !sources.is_empty() {
        let cached = report::build_report(&sources.merged(), &options, Utc::now());
        info!("Cached state:");
        report::log_summary(&cached, cfg.dashboard_top_n);
    }

    // 4a) Single refresh, report to stdout
    if args.once {
        let outcome = refresh::refresh(&client, &mut sources, RefreshScope::Full);
        if !outcome.any_updated() && sources.is_empty() {
            return Err("all sources failed and no snapshot is available".to_string());
        }
        save_snapshot(&cfg, &sources, &outcome);
        let report = report::build_report(&sources.merged(), &options, Utc::now());
        let json = serde_json::to_string_pretty(&report).map_err(|e| format!("serializing report failed: {}", e))?;
        println!("{}", json);
        return Ok(());
    }

    // 4b) Refresh loop; stdin lines request a manual refresh or stop
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || refresh::forward_commands(std::io::stdin().lock(), tx));
    info!(
        "Starting refresh loop: interval={}s (press Enter to refresh, `q` to quit)",
        cfg.refresh_interval.as_secs()
    );
    refresh::run_loop(
        &client,
        &mut sources,
        &rx,
        cfg.refresh_interval,
        |sources, outcome, trigger| {
            if trigger != Trigger::Tick {
                info!("{:?} refresh: {} source(s) updated, {} failed", trigger, outcome.updated.len(), outcome.failed.len());
            }
            save_snapshot(&cfg, sources, outcome);
            let report = report::build_report(&sources.merged(), &options, Utc::now());
            report::log_summary(&report, cfg.dashboard_top_n);
        },
    )
}

fn main() {
    let args = match parse_args(std::env::args_os().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match load_env(&args) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) set)",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "dispenser-monitor {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&args) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
