mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use uptime_core::{
    EngineConfig, Header, HttpChecker, LogNotifier, MatchRule, MemoryStore, Monitor, MonitorSettings, MonitorStore,
    Notifier, Scheduler, SchedulerState, UrlChecker, WebhookNotifier,
};

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        VERSION
    } else {
        // Built once for the process lifetime.
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// HTTP uptime monitor: scheduled checks, alerting and run history.
#[derive(Parser)]
#[command(name = "uptime-monitor", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and the HTTP API server.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Probe a single URL once and print the verdict (no API server).
    Check {
        /// URL to probe.
        url: String,

        /// HTTP method.
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request header as `Name: value`. Repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body.
        #[arg(short, long)]
        data: Option<String>,

        /// Content type for the request body.
        #[arg(long)]
        content_type: Option<String>,

        /// Body must contain this text. Repeatable.
        #[arg(long)]
        contains: Vec<String>,

        /// Body must match this regular expression. Repeatable.
        #[arg(long)]
        regex: Vec<String>,

        /// Extra status codes treated as success, e.g. "401,403".
        #[arg(long)]
        allowed_status: Option<String>,

        /// Timeout in seconds.
        #[arg(short, long, default_value_t = 30)]
        timeout: u32,

        /// Print the full result as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => {
            run_serve(listen, config).await;
        }
        Commands::Check {
            url,
            method,
            headers,
            data,
            content_type,
            contains,
            regex,
            allowed_status,
            timeout,
            json,
        } => {
            fmt()
                .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
                .init();

            let mut settings = MonitorSettings::new("cli", url);
            settings.method = method;
            settings.timeout_seconds = timeout;
            settings.allowed_status_codes = allowed_status;
            settings.content_type = content_type;
            settings.body = data;
            settings.match_rules = contains
                .into_iter()
                .map(MatchRule::contains)
                .chain(regex.into_iter().map(MatchRule::regex))
                .collect();
            for h in &headers {
                match h.split_once(':') {
                    Some((name, value)) => settings.headers.push(Header::new(name.trim(), value.trim())),
                    None => {
                        eprintln!("{} header '{}' must look like 'Name: value'", style("error:").red().bold(), h);
                        std::process::exit(2);
                    }
                }
            }

            let passed = run_check(settings.normalized(), json).await;
            std::process::exit(if passed { 0 } else { 1 });
        }
    }
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: Option<PathBuf>) {
    let app_config = if let Some(ref path) = config_path {
        match config::AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                Some(c)
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        None
    };

    let listen = listen_override
        .or(app_config.as_ref().map(|c| c.server.listen))
        .unwrap_or_else(config::default_listen);

    let engine = app_config
        .as_ref()
        .map(|c| c.engine.to_engine_config())
        .unwrap_or_default();

    let webhooks = app_config
        .as_ref()
        .map(|c| c.webhook.clone())
        .unwrap_or_default();

    let shared_client = match HttpChecker::build_client() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let notifier: Arc<dyn Notifier> = if webhooks.is_empty() {
        tracing::info!("No webhooks configured, alerts go to the log");
        Arc::new(LogNotifier)
    } else {
        tracing::info!(count = webhooks.len(), "Webhook notifier configured");
        Arc::new(WebhookNotifier::new(webhooks, shared_client.clone()))
    };

    let store = Arc::new(MemoryStore::new());
    if let Some(ref app_config) = app_config {
        if let Err(e) = seed_store(store.as_ref(), app_config).await {
            tracing::error!(error = %e, "Failed to seed monitors from config");
            std::process::exit(1);
        }
    }

    let checker = Arc::new(HttpChecker::with_client(shared_client, engine.snippet_limit_bytes));
    let scheduler = Scheduler::new(store, checker, notifier, engine);
    if let Err(e) = scheduler.start().await {
        tracing::error!(error = %e, "Failed to start scheduler");
        std::process::exit(1);
    }

    let state = uptime_api::state::AppState::new(scheduler.clone());

    tracing::info!(%listen, "Starting uptime monitor API server");
    if let Err(e) = uptime_api::serve(listen, state, uptime_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping scheduler...");
    scheduler.stop().await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        while scheduler.state().await != SchedulerState::Stopped {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    match stopped {
        Ok(()) => tracing::info!("Scheduler stopped"),
        Err(_) => tracing::warn!("Scheduler did not stop in time; in-flight leases will expire"),
    }

    tracing::info!("Shutdown complete");
}

async fn seed_store(store: &dyn MonitorStore, app_config: &config::AppConfig) -> Result<(), String> {
    for (owner, account) in &app_config.accounts {
        store
            .set_account_retention_days(owner, account.retention_days)
            .await
            .map_err(|e| e.to_string())?;
    }

    let now = Utc::now();
    for def in &app_config.monitor {
        let monitor = store
            .insert_monitor(Monitor::new(def.owner.clone(), def.to_settings(), now))
            .await
            .map_err(|e| e.to_string())?;
        tracing::info!(
            monitor_id = %monitor.id,
            owner = %monitor.owner_id,
            name = %monitor.settings.name,
            url = %monitor.settings.url,
            "Monitor loaded from config"
        );
    }
    Ok(())
}

/// Runs one probe with a spinner and prints the verdict. Returns whether it passed.
async fn run_check(settings: MonitorSettings, json: bool) -> bool {
    let engine = EngineConfig::default().with_allowed_intervals(vec![settings.interval_seconds]);
    if let Err(e) = settings.validate(&engine) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(2);
    }

    let checker = match HttpChecker::new(engine.snippet_limit_bytes) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} failed to build HTTP client: {}", style("error:").red().bold(), e);
            std::process::exit(2);
        }
    };

    let monitor = Monitor::new("cli", settings, Utc::now());
    let request = monitor.check_request();

    let spinner = ProgressBar::new_spinner();
    if let Ok(s) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(s);
    }
    spinner.set_message(format!("{} {}", request.method, request.url));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = checker.check(&request).await;
    spinner.finish_and_clear();

    if json {
        match serde_json::to_string_pretty(&result) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("{} {}", style("error:").red().bold(), e),
        }
        return result.success;
    }

    let verdict = if result.success {
        style("PASS").green().bold()
    } else {
        style("FAIL").red().bold()
    };
    let status = result
        .status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "---".into());
    println!(
        "{}  {} {}  {}  {}ms",
        verdict,
        style(&request.method).dim(),
        style(&request.url).bold(),
        status,
        result.duration_ms
    );

    if let Some(ct) = &result.content_type {
        println!("  {} {}", style("type:   ").dim(), ct);
    }
    if let Some(len) = result.content_length {
        println!("  {} {} bytes", style("length: ").dim(), len);
    }
    for m in &result.match_results {
        let mark = if m.matched {
            style("ok  ").green()
        } else {
            style("miss").red()
        };
        println!(
            "  {} {} {:<8} {}",
            style("match:  ").dim(),
            mark,
            m.rule.mode.to_string(),
            m.detail
        );
    }
    if let Some(err) = &result.error_message {
        let kind = result.error_kind.map(|k| format!(" ({})", k)).unwrap_or_default();
        println!("  {} {}{}", style("error:  ").dim(), style(err).red(), kind);
    }

    result.success
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
