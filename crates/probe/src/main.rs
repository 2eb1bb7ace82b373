// Operator tool: open or restore a session and evaluate access requirements.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use accessgate_auth::{AccessRequirement, Principal, explain};
use accessgate_session::{LoginRequest, SessionConfig, SessionManager, build_session};

#[derive(Parser)]
#[command(name = "accessgate-probe")]
#[command(about = "Inspect sessions and access decisions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session
    Login {
        #[arg(short, long)]
        username: String,

        /// Falls back to ACCESSGATE_PASSWORD
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Print the principal of the stored session
    Whoami,

    /// Evaluate an access requirement against the current session
    Check {
        /// Required role (repeatable)
        #[arg(short, long = "role")]
        roles: Vec<String>,

        /// Required permission as resource:action (repeatable)
        #[arg(short, long = "permission")]
        permissions: Vec<String>,

        /// Require every role instead of any one
        #[arg(long)]
        require_all: bool,

        /// Requirement as JSON: {"requiredRoles": [...], "requiredPermissions": [...], "requireAll": bool}
        #[arg(long, conflicts_with_all = ["roles", "permissions", "require_all"])]
        json: Option<String>,

        /// Include roles, permissions and what is missing
        #[arg(short, long)]
        explain: bool,
    },

    /// End the stored session
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    accessgate_observability::init();
    let cli = Cli::parse();

    let config = SessionConfig::from_env().context("invalid configuration")?;
    let session = build_session(&config).context("failed to set up session")?;

    match cli.command {
        Commands::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => std::env::var("ACCESSGATE_PASSWORD")
                    .context("no --password given and ACCESSGATE_PASSWORD is not set")?,
            };
            let principal = session
                .login(LoginRequest::new(username, password))
                .await
                .context("login failed")?;
            print_json(&summary(&principal))?;
        }
        Commands::Whoami => {
            let principal = restore(&session).await?;
            print_json(&summary(&principal))?;
        }
        Commands::Check {
            roles,
            permissions,
            require_all,
            json,
            explain: verbose,
        } => {
            let requirement = match json {
                Some(raw) => serde_json::from_str::<AccessRequirement>(&raw)
                    .context("invalid requirement JSON")?,
                None => {
                    let base = if require_all {
                        AccessRequirement::all_roles(roles)
                    } else {
                        AccessRequirement::any_role(roles)
                    };
                    base.with_permissions(&permissions)
                        .context("invalid permission")?
                }
            };

            // A missing session is a valid input: it yields Deny(Unauthenticated).
            if let Err(err) = session.resume().await {
                tracing::warn!(error = %err, "could not restore session");
            }
            let snapshot = session.snapshot();

            if verbose {
                print_json(&explain(snapshot.principal(), &requirement))?;
            } else {
                print_json(&snapshot.decide(&requirement))?;
            }
        }
        Commands::Logout => {
            if let Err(err) = session.resume().await {
                tracing::warn!(error = %err, "could not restore session; clearing local state");
            }
            session.logout().await;
            print_json(&json!({"phase": session.phase()}))?;
        }
    }

    Ok(())
}

async fn restore(session: &SessionManager) -> Result<Arc<Principal>> {
    match session.resume().await.context("failed to restore session")? {
        Some(principal) => Ok(principal),
        None => bail!("no stored session; run `accessgate-probe login` first"),
    }
}

fn summary(principal: &Principal) -> serde_json::Value {
    json!({
        "id": principal.id,
        "username": principal.username,
        "displayName": principal.display_name,
        "roles": principal.role_names().map(|r| r.as_str()).collect::<Vec<_>>(),
        "effectivePermissions": principal
            .effective_permissions()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
