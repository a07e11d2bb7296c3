//! staffdesk - terminal front end for the employee-management session layer.
//!
//! Each invocation restores the persisted session (verifying it with the
//! backend), runs one command, and exits. Requests go through the client the
//! session manager issues, so a rejected token signs the profile out exactly
//! as the web client would.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde_json::Value;
use staffdesk_core::{
    ApiError, Config, LoginFlow, RouteDecision, RouteTable, SessionEvent, SessionManager,
    SessionStatus,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: staffdesk <command>

Commands:
  login [EMP_ID]   Sign in as an admin (password from STAFFDESK_PASSWORD or prompt)
  logout           Sign out and remove the stored session
  status           Show the current session
  refresh          Re-fetch the signed-in profile
  open <PATH>      Show what navigating to PATH would do
  get <PATH>       GET a backend path with the session's credentials";

enum Command {
    Login(Option<String>),
    Logout,
    Status,
    Refresh,
    Open(String),
    Get(String),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let arg = |i: usize| args.get(i).cloned();
        match args.first().map(String::as_str) {
            Some("login") => Ok(Command::Login(arg(1))),
            Some("logout") => Ok(Command::Logout),
            Some("status") | None => Ok(Command::Status),
            Some("refresh") => Ok(Command::Refresh),
            Some("open") => arg(1).map(Command::Open).context("open needs a PATH"),
            Some("get") => arg(1).map(Command::Get).context("get needs a PATH"),
            Some(other) => bail!("Unknown command: {}\n\n{}", other, USAGE),
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help" | "help")) {
        println!("{}", USAGE);
        return Ok(());
    }
    let command = Command::parse(&args)?;

    let mut config = Config::load().context("Failed to load config")?;
    let store = config.open_store()?;
    let session = SessionManager::new(&config, store)?;
    info!(api_url = %config.api_url, "staffdesk starting");

    session.initialize().await;

    match command {
        Command::Login(emp_id) => login(&session, &mut config, emp_id).await,
        Command::Logout => {
            session.logout();
            println!("Signed out.");
            Ok(())
        }
        Command::Status => {
            print_status(&session);
            Ok(())
        }
        Command::Refresh => refresh(&session).await,
        Command::Open(path) => {
            open(&session, &config, &path);
            Ok(())
        }
        Command::Get(path) => get(&session, &path).await,
    }
}

async fn login(session: &SessionManager, config: &mut Config, emp_id: Option<String>) -> Result<()> {
    if session.state().is_authenticated() {
        println!("Already signed in. Run `staffdesk logout` first to switch accounts.");
        return Ok(());
    }

    let emp_id = match emp_id.or_else(|| config.last_emp_id.clone()) {
        Some(id) => id,
        None => prompt("Employee ID: ")?,
    };
    let password = match std::env::var("STAFFDESK_PASSWORD") {
        Ok(pw) if !pw.is_empty() => pw,
        _ => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    let mut flow = LoginFlow::new(session.clone());
    match flow.submit(&emp_id, &password).await {
        Ok(user) => {
            config.last_emp_id = Some(emp_id.trim().to_string());
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Failed to save config");
            }
            println!("Signed in as {} ({}).", display_name(&user.name, &user.id), user.role);
            Ok(())
        }
        Err(e) => bail!("{}", e),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn display_name<'a>(name: &'a str, fallback: &'a str) -> &'a str {
    if name.is_empty() {
        fallback
    } else {
        name
    }
}

fn print_status(session: &SessionManager) {
    let state = session.state();
    match (state.status(), state.user()) {
        (SessionStatus::Authenticated, Some(user)) => {
            println!("Signed in as {}", display_name(&user.name, &user.id));
            println!("  role:  {}", user.role);
            println!("  email: {}", user.email);
            if let Some(at) = state.authenticated_at() {
                println!(
                    "  since: {}",
                    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        (status, _) => println!("Not signed in ({:?}).", status),
    }
}

async fn refresh(session: &SessionManager) -> Result<()> {
    let mut events = session.events();
    match session.refresh_profile().await {
        Ok(Some(user)) => {
            println!("Profile refreshed: {} ({})", display_name(&user.name, &user.id), user.role);
            Ok(())
        }
        Ok(None) => {
            println!("Profile unchanged.");
            Ok(())
        }
        Err(e) => report_failure(&mut events, e),
    }
}

fn open(session: &SessionManager, config: &Config, path: &str) {
    let table = RouteTable::standard(config);
    match table.resolve(path, &session.state()) {
        RouteDecision::Render(path) => println!("render {}", path),
        RouteDecision::Redirect(to) => println!("redirect {}", to),
        RouteDecision::Loading => println!("loading"),
        RouteDecision::Denied { required_role } => {
            println!("403 - Sorry, you are not authorized to access this page.");
            println!("(requires role: {}; return to {})", required_role, config.home_path);
        }
    }
}

async fn get(session: &SessionManager, path: &str) -> Result<()> {
    let mut events = session.events();
    match session.issue_http_client().get::<Value>(path).await {
        Ok(resp) => {
            println!("{}", serde_json::to_string_pretty(&resp.data)?);
            Ok(())
        }
        Err(e) => report_failure(&mut events, e),
    }
}

fn report_failure(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    error: ApiError,
) -> Result<()> {
    if let Ok(SessionEvent::Invalidated { redirect_to, .. }) = events.try_recv() {
        eprintln!("Session expired or revoked; signed out (redirect to {}).", redirect_to);
    }
    if error.is_no_response() {
        bail!("No response from server. Please check your connection.");
    }
    bail!("{}", error)
}
