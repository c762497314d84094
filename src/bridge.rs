use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use turnstile_config::{load_config, load_config_file, Config};
use turnstile_core::logging::{
    default_log_file_path, ensure_log_dir, log_level_to_filter, rotate_log_files,
    DEFAULT_MAX_LOG_FILES, DEFAULT_MAX_LOG_SIZE, LOG_FILE_NAME,
};
use turnstile_dap::{
    Breakpoints, DebugAdapter, DebugServer, DialogCodeModel, Events, SourceRegistry,
};
use turnstile_platform::{DefaultPaths, PlatformPaths};

use crate::demo::DemoBot;
use crate::Options;

/// Resolve the configuration the bridge runs with.
///
/// An explicit `--config` file must load. Otherwise a broken global or
/// project file falls back to defaults and the error is returned alongside
/// so it can be logged once logging is up.
fn resolve_config(
    options: &Options,
    paths: Option<&DefaultPaths>,
) -> Result<(Config, Option<String>)> {
    let (mut config, problem) = match (&options.config, paths) {
        (Some(file), _) => {
            let config = load_config_file(file)
                .with_context(|| format!("failed to load {}", file.display()))?;
            (config, None)
        }
        (None, Some(paths)) => {
            let project_dir = std::env::current_dir().ok();
            match load_config(&paths.config_dir(), project_dir.as_deref()) {
                Ok(config) => (config, None),
                Err(e) => (Config::default(), Some(e.to_string())),
            }
        }
        (None, None) => (Config::default(), None),
    };

    if let Some(host) = &options.host {
        config.bridge.host = host.clone();
    }
    if let Some(port) = options.port {
        config.bridge.port = port;
    }
    Ok((config, problem))
}

/// Create the log directory and rotate an oversized log.
fn prepare_log_file(log_path: &Path) -> std::result::Result<(), String> {
    ensure_log_dir(log_path)
        .map_err(|e| format!("cannot create log directory for {}: {e}", log_path.display()))?;
    rotate_log_files(log_path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES)
        .map_err(|e| format!("cannot rotate log {}: {e}", log_path.display()))
}

fn init_logging(config: &Config, options: &Options, paths: Option<&DefaultPaths>) -> PathBuf {
    let log_path = config.log.file.clone().unwrap_or_else(|| match paths {
        Some(paths) => paths.log_dir().join(LOG_FILE_NAME),
        None => default_log_file_path(),
    });

    if let Err(problem) = prepare_log_file(&log_path) {
        eprintln!("turnstile: {problem}");
    }

    let filter = match &options.log_level {
        Some(level) => log_level_to_filter(level),
        None => config.log.level.as_filter(),
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Without a writable log file the bridge still runs, just silently.
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => tracing_subscriber::fmt()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_env_filter(env_filter)
            .init(),
        Err(e) => eprintln!("turnstile: cannot open log {}: {e}", log_path.display()),
    }
    log_path
}

fn demo_dir(paths: Option<&DefaultPaths>) -> PathBuf {
    match paths {
        Some(paths) => paths.data_dir().join("demo"),
        None => std::env::temp_dir().join("turnstile-demo"),
    }
}

/// Start the debug server, then feed stdin lines to the demo bot until EOF.
pub(crate) fn run_bridge(options: Options) -> Result<()> {
    let paths = DefaultPaths::new().ok();
    let (config, problem) = resolve_config(&options, paths.as_ref())?;
    let log_path = init_logging(&config, &options, paths.as_ref());

    info!(log = %log_path.display(), address = %config.bridge.address(), "turnstile starting");
    if let Some(problem) = problem {
        warn!(error = %problem, "ignoring configuration, using defaults");
    }

    let sources = Arc::new(SourceRegistry::new());
    let bot = Arc::new(DemoBot::install(&demo_dir(paths.as_ref()), &sources)?);
    let breakpoints = Arc::new(Breakpoints::new(sources.clone(), Arc::new(DialogCodeModel)));
    let events = Arc::new(Events::new(
        config.events.filters.iter().cloned(),
        &config.events.enabled,
    ));
    let mut adapter = DebugAdapter::new(sources, breakpoints).with_events(events);
    if config.bridge.allow_terminate {
        adapter = adapter.with_terminate(Arc::new(|| {
            info!("debugger asked the bridge to exit");
            std::process::exit(0);
        }));
    }
    let adapter = Arc::new(adapter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let server = runtime
        .block_on(DebugServer::bind(adapter.clone(), config.bridge.address()))
        .with_context(|| format!("failed to listen on {}", config.bridge.address()))?;
    let address = server.local_addr()?;
    let (stop, shutdown) = watch::channel(false);
    let server_task = runtime.spawn(server.run(shutdown));

    eprintln!(
        "turnstile: debugger port {address}, dialog {}",
        bot.path().display()
    );
    eprintln!("turnstile: type a message per line, end input to quit");

    let (turns, input_error) = match bot.serve(&adapter, std::io::stdin().lock()) {
        Ok(turns) => (turns, None),
        Err(e) => (Vec::new(), Some(e)),
    };

    info!("input closed, shutting down");
    stop.send(true).ok();
    adapter.close();
    for turn in turns {
        if turn.join().is_err() {
            warn!("turn thread panicked");
        }
    }
    match runtime.block_on(server_task) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "debug server failed"),
        Err(e) => error!(error = %e, "debug server task panicked"),
    }
    runtime.shutdown_timeout(Duration::from_secs(1));

    match input_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
