//! authgate CLI - headless driver for the session store and route guard
//!
//! Each invocation restores the session from the local continuity storage,
//! runs one operation, and exits:
//! - Sign in / sign up against the account service
//! - Sign out (clears the persisted session)
//! - Check what the route guard would do for a given path

mod navigator;

use anyhow::{Context, Result};
use authgate_core::{
    AuthError, AuthgateConfig, ContinuityStore, FileContinuityStore, GuardDecision, HttpAccountService,
    RouteGuard, Session, SessionStore, config,
};
use clap::{Parser, Subcommand, ValueEnum};
use navigator::TerminalNavigator;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "authgate")]
#[command(version)]
#[command(about = "Session store and route guard for the web office shell")]
#[command(long_about = "
authgate keeps a client-side session across restarts and checks protected
routes against it.

Quick start:
  1. Sign in:            authgate login --email admin@anbtech.co.kr --password ...
  2. Check a route:      authgate visit /dashboard
  3. Sign out:           authgate logout
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    #[command(alias = "signin")]
    Login {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        password: String,

        /// Destination to resume after sign-in (the login page's continueUrl)
        #[arg(long)]
        continue_url: Option<String>,
    },

    /// Create a new account (does not sign in)
    #[command(alias = "register")]
    Signup {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        password: String,
    },

    /// Show the current session
    Status,

    /// Sign out and clear the persisted session
    #[command(alias = "signout")]
    Logout,

    /// Sign in as the guest identity (development builds)
    Skip,

    /// Run the route guard for a protected path
    Visit {
        /// Path being opened, e.g. /dashboard
        path: String,
    },

    /// Show configuration paths and settings
    Config,
}

type Store = SessionStore<Arc<dyn ContinuityStore>, HttpAccountService>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("authgate={},authgate_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config();
    let store = open_store(&config)?;
    store.initialize();

    let result = match &cli.command {
        Commands::Login {
            email,
            password,
            continue_url,
        } => cmd_login(&cli, &config, &store, email, password, continue_url.as_deref()).await,
        Commands::Signup {
            email,
            name,
            password,
        } => cmd_signup(&cli, &store, email, name, password).await,
        Commands::Status => cmd_status(&cli, &store),
        Commands::Logout => cmd_logout(&cli, &store),
        Commands::Skip => cmd_skip(&cli, &store),
        Commands::Visit { path } => cmd_visit(&cli, &config, &store, path).await,
        Commands::Config => cmd_config(&cli, &config, &store),
    };

    store.teardown();
    result
}

fn open_storage() -> Result<Arc<dyn ContinuityStore>> {
    let file = FileContinuityStore::default_location().context("Failed to locate session storage")?;

    #[cfg(feature = "keyring-storage")]
    let storage: Arc<dyn ContinuityStore> = Arc::new(authgate_core::KeyringContinuityStore::new(file));

    #[cfg(not(feature = "keyring-storage"))]
    let storage: Arc<dyn ContinuityStore> = Arc::new(file);

    Ok(storage)
}

fn open_store(config: &AuthgateConfig) -> Result<Store> {
    let accounts = HttpAccountService::new(&config.api_url)?;
    Ok(SessionStore::new(config.session.clone(), open_storage()?, accounts))
}

fn session_json(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "isAuthenticated": session.is_authenticated(),
        "isLoading": session.is_loading(),
        "status": session.status(),
        "user": session.user(),
        "since": session.since(),
    })
}

/// Report a failed operation. Text output is left to the error returned
/// from `main`; JSON output also gets a status object on stdout.
fn fail(cli: &Cli, status: &str, err: AuthError) -> anyhow::Error {
    if let OutputFormat::Json = cli.format {
        println!(
            "{}",
            serde_json::json!({
                "status": status,
                "error": err.to_string(),
            })
        );
    }
    anyhow::Error::new(err).context(status.replace('_', " "))
}

async fn cmd_login(
    cli: &Cli,
    config: &AuthgateConfig,
    store: &Store,
    email: &str,
    password: &str,
    continue_url: Option<&str>,
) -> Result<()> {
    let session = store.snapshot();
    if let Some(user) = session.user() {
        match cli.format {
            OutputFormat::Text => {
                println!("Already signed in as {} <{}>", user.name, user.email);
                println!("Use 'authgate logout' to sign out first.");
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "already_signed_in",
                        "session": session_json(&session),
                    })
                );
            }
        }
        return Ok(());
    }

    let identity = match store.sign_in(email, password).await {
        Ok(identity) => identity,
        Err(e) => return Err(fail(cli, "sign_in_failed", e)),
    };
    let resume = config.guard.resume_path(continue_url);

    match cli.format {
        OutputFormat::Text => {
            println!("Signed in as {} <{}>", identity.name, identity.email);
            println!("Continue to: {}", resume);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "signed_in",
                    "session": session_json(&store.snapshot()),
                    "continue_to": resume,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_signup(cli: &Cli, store: &Store, email: &str, name: &str, password: &str) -> Result<()> {
    let account = match store.sign_up(email, name, password).await {
        Ok(account) => account,
        Err(e) => return Err(fail(cli, "sign_up_failed", e)),
    };

    match cli.format {
        OutputFormat::Text => {
            println!("Account created for {} <{}>", account.name, account.email);
            println!("Sign in with: authgate login --email {}", account.email);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "account_created",
                    "account": account,
                })
            );
        }
    }

    Ok(())
}

fn cmd_status(cli: &Cli, store: &Store) -> Result<()> {
    let session = store.snapshot();

    match cli.format {
        OutputFormat::Text => {
            match session.user() {
                Some(user) => {
                    println!("Status: Signed in");
                    println!("Name:   {}", user.name);
                    println!("Email:  {}", user.email);
                    println!("Id:     {}", user.id);
                }
                None => {
                    println!("Status: Not signed in");
                    println!();
                    println!("Run 'authgate login' to sign in.");
                }
            }
            println!();
            println!("Storage: {}", store.storage().describe());
        }
        OutputFormat::Json => {
            let mut json = session_json(&session);
            json["storage_info"] = serde_json::Value::String(store.storage().describe());
            println!("{}", json);
        }
    }

    Ok(())
}

fn cmd_logout(cli: &Cli, store: &Store) -> Result<()> {
    let previous = store.snapshot();
    store.sign_out();

    match cli.format {
        OutputFormat::Text => match previous.user() {
            Some(user) => println!("Signed out {}", user.email),
            None => println!("Not signed in."),
        },
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "signed_out",
                    "was_signed_in": previous.is_authenticated(),
                })
            );
        }
    }

    Ok(())
}

fn cmd_skip(cli: &Cli, store: &Store) -> Result<()> {
    let identity = match store.skip() {
        Ok(identity) => identity,
        Err(e) => return Err(fail(cli, "skip_failed", e)),
    };

    match cli.format {
        OutputFormat::Text => println!("Signed in as guest {}", identity.name),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": "signed_in",
                    "session": session_json(&store.snapshot()),
                })
            );
        }
    }

    Ok(())
}

async fn cmd_visit(cli: &Cli, config: &AuthgateConfig, store: &Store, path: &str) -> Result<()> {
    let navigator = TerminalNavigator::at(path);
    let mut guard = RouteGuard::new(config.guard.clone());
    let decision = guard.evaluate(&store.snapshot(), &navigator).await;

    match cli.format {
        OutputFormat::Text => match &decision {
            GuardDecision::Render => println!("{}: allowed", navigator.path()),
            GuardDecision::Redirect { redirect } => {
                println!("{}: not signed in, redirect to {}", navigator.path(), redirect)
            }
            GuardDecision::Pending => println!("{}: pending", navigator.path()),
        },
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "path": navigator.path(),
                    "guard": decision,
                    "redirect_target": navigator.last_redirect().map(|r| r.target()),
                })
            );
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli, config: &AuthgateConfig, store: &Store) -> Result<()> {
    let config_path = config::get_config_file_path_string();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("API endpoint:     {} (from {})", config.api_url, config.source);
            println!("Login path:       {}", config.guard.login_path);
            println!("Continue param:   {}", config.guard.continue_param);
            println!("Guest skip:       {}", if config.session.allow_skip { "enabled" } else { "disabled" });
            println!("Session storage:  {}", store.storage().describe());
            println!();
            println!("Environment variables:");
            println!("  {} - Override API endpoint", config::api_url_env_var());
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "api_url": config.api_url,
                    "api_source": format!("{}", config.source),
                    "login_path": config.guard.login_path,
                    "continue_param": config.guard.continue_param,
                    "allow_skip": config.session.allow_skip,
                    "session_storage": store.storage().describe(),
                })
            );
        }
    }

    Ok(())
}
