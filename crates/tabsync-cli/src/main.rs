//! Tabsync CLI - session, search and cross-process sync from the shell.
//!
//! Every invocation is one client context of the configured origin. Several
//! `tabsync watch` processes behave like several browser tabs: a logout in one
//! shell ends the session in all of them.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tabsync_core::api::HttpTransport;
use tabsync_core::auth::SessionSnapshot;
use tabsync_core::models::Credentials;
use tabsync_core::search::SearchPhase;
use tabsync_core::store::{FileStore, SharedStore};
use tabsync_core::{Config, Navigator, TabContext};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on waiting for one search answer
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How often `watch` checks whether the displayed status changed
const STATUS_REFRESH: Duration = Duration::from_secs(1);

const USAGE: &str = "\
Usage: tabsync <command>

Commands:
  status             Show the current session
  login [email]      Log in (password is prompted)
  logout             Log out here and in every other window
  search <text>      Search contributors
  categories         List service categories
  watch              Follow session changes until Ctrl-C";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the log file and must live until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tabsync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Announces remote logouts on the terminal.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn to_landing(&self) {
        println!("Session ended in another window");
    }
}

fn open_context(config: &Config) -> Result<TabContext> {
    let store_dir = config.store_dir()?;
    let store: Arc<dyn SharedStore> = Arc::new(
        FileStore::open(&store_dir, config.store_scan_interval())
            .with_context(|| format!("Failed to open shared store at {}", store_dir.display()))?,
    );
    let transport = HttpTransport::new(config.api_base_url.clone(), store.clone())
        .context("Failed to create HTTP client")?;
    Ok(TabContext::new(
        store,
        Arc::new(transport),
        Arc::new(TerminalNavigator),
        config.clone(),
    ))
}

fn describe(snapshot: &SessionSnapshot) -> String {
    match &snapshot.identity {
        Some(identity) => format!("Logged in as {} <{}>", identity.name, identity.email),
        None => format!("{:?}", snapshot.status),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");
    let rest = args.get(1..).unwrap_or_default();

    match command {
        "status" => status(&config).await,
        "login" => login(&config, rest.first().cloned()).await,
        "logout" => logout(&config).await,
        "search" => search(&config, &rest.join(" ")).await,
        "categories" => categories(&config).await,
        "watch" => watch(&config).await,
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("Unknown command: {other}\n\n{USAGE}"),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn status(config: &Config) -> Result<()> {
    let ctx = open_context(config)?;
    let snapshot = ctx.session().resolve().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn login(config: &Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => {
            print!("Email: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    if email.is_empty() {
        bail!("Email is required");
    }
    let password = rpassword::prompt_password("Password: ")?;

    let ctx = open_context(config)?;
    match ctx.session().login(&Credentials { email, password }).await {
        Ok(identity) => {
            info!(user = %identity.id, "Login succeeded");
            println!("Logged in as {}", identity.display_name());
            Ok(())
        }
        Err(e) => bail!("Login failed: {}", e.user_message()),
    }
}

async fn logout(config: &Config) -> Result<()> {
    let ctx = open_context(config)?;
    ctx.logout().await;
    println!("Logged out");
    Ok(())
}

async fn search(config: &Config, text: &str) -> Result<()> {
    let ctx = open_context(config)?;
    let search = ctx.contributor_search();
    let mut rx = search.subscribe();

    search.search(text);
    if search.snapshot().phase == SearchPhase::Idle {
        bail!("Search needs at least {} characters", config.search_min_chars);
    }

    let view = tokio::time::timeout(SEARCH_TIMEOUT, async {
        loop {
            if rx.changed().await.is_err() {
                return None;
            }
            let view = rx.borrow_and_update().clone();
            if view.phase == SearchPhase::Idle {
                return Some(view);
            }
        }
    })
    .await
    .context("Search timed out")?
    .context("Search was cancelled")?;

    if let Some(error) = view.error {
        bail!("Search failed: {error}");
    }
    if view.results.is_empty() {
        println!("No contributors match \"{}\"", text.trim());
    }
    for contributor in view.results.iter() {
        match &contributor.email {
            Some(email) => println!("{}  <{}>", contributor.name, email),
            None => println!("{}", contributor.name),
        }
    }
    Ok(())
}

async fn categories(config: &Config) -> Result<()> {
    let ctx = open_context(config)?;
    let view = ctx.registry().load_categories(ctx.api()).await;
    if let Some(error) = view.error {
        bail!("Could not load categories: {error}");
    }
    for category in view.data.iter() {
        println!("{:<24} {}", category.id, category.name);
    }
    Ok(())
}

async fn watch(config: &Config) -> Result<()> {
    let ctx = open_context(config)?;
    let _signals = ctx.channel().subscribe_signals(|signal| {
        println!(
            "[{}] {} signal",
            signal.emitted_at.format("%H:%M:%S"),
            signal.kind.key()
        );
    });
    let _poller = ctx.session_poller(config.poll_interval());

    let mut last = describe(&ctx.session().resolve().await);
    println!("{last}");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(STATUS_REFRESH);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let current = describe(&ctx.session().read());
                if current != last {
                    println!("{current}");
                    last = current;
                }
            }
        }
    }
    Ok(())
}
