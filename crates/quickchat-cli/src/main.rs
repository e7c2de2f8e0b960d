//! Quickchat terminal client.
//!
//! Runs a session against an in-process simulated backend. Each stdin line
//! is sent as a message; `/quit` exits, `/expire` expires the access token
//! and `/status` prints the session phase.
//!
//! # Usage
//!
//! ```bash
//! # Tokens minted by the simulated backend
//! quickchat --identity alice
//!
//! # Tokens fetched from a token endpoint
//! quickchat --identity alice --token-url http://localhost:8080/token
//!
//! # Pre-obtained token (identity optional; no refresh)
//! quickchat --token tok123
//! ```

mod terminal;

use std::sync::Arc;

use clap::Parser;
use quickchat_harness::{SimBackend, SimTokenSource};
use quickchat_session::{
    AccessToken, HttpTokenSource, Identity, Session, SessionConfig, SessionDelegate, Url,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::terminal::TerminalDelegate;

const WELCOME_AUTHOR: &str = "quickchat";

/// Owner the simulator records for a `--token` given without `--identity`.
const TOKEN_OWNER: &str = "guest";

/// Quickchat terminal client
#[derive(Parser, Debug)]
#[command(name = "quickchat")]
#[command(about = "Line-oriented chat over a simulated conversations backend")]
#[command(version)]
struct Args {
    /// Identity to log in as
    ///
    /// Optional with `--token`, where it only names the token's owner in
    /// the simulator. Token refresh needs an identity from the token
    /// endpoint, so it is skipped for `--token` logins.
    #[arg(short, long, required_unless_present = "token")]
    identity: Option<String>,

    /// Pre-obtained access token (skips the token endpoint)
    #[arg(short, long, conflicts_with = "token_url")]
    token: Option<String>,

    /// Token endpoint queried as `GET <url>?identity=<id>`
    #[arg(long)]
    token_url: Option<Url>,

    /// Unique name of the conversation to join
    #[arg(short, long, default_value = quickchat_session::DEFAULT_CONVERSATION_NAME)]
    conversation: String,

    /// Number of previous messages to load
    #[arg(long, default_value_t = quickchat_session::DEFAULT_HISTORY_LIMIT)]
    history_limit: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let identity = Identity::new(args.identity.as_deref().unwrap_or(TOKEN_OWNER));
    let config = SessionConfig::default()
        .with_conversation_name(args.conversation.clone())
        .with_history_limit(args.history_limit);

    let backend = SimBackend::new();
    backend.add_member(&args.conversation, WELCOME_AUTHOR);
    backend.post_message(
        &args.conversation,
        WELCOME_AUTHOR,
        format!("Welcome to {}", args.conversation),
    )?;

    let builder = Session::builder(backend.clone()).config(config);
    let builder = match &args.token_url {
        Some(url) => {
            tracing::info!(%url, "using token endpoint");
            backend.accept_any_token(identity.clone());
            builder.token_source(HttpTokenSource::new(url.clone()))
        },
        None => builder.token_source(SimTokenSource::new(backend.clone())),
    };
    let (handle, notifications) = builder.spawn();

    let delegate = Arc::new(TerminalDelegate::new(std::io::stdout()));
    let dispatcher = tokio::spawn(notifications.dispatch(Arc::downgrade(&delegate)));

    let login = match args.token {
        Some(token) => {
            let token = AccessToken::new(token);
            backend.register_token(&token, identity.clone());
            handle.login_with_token(token).await
        },
        None => handle.login_from_server(identity.clone()).await,
    };
    if let Err(e) = login {
        tracing::error!(error = %e, "login failed");
        handle.shutdown().await;
        return Err(e.into());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {},
            "/quit" => break,
            "/expire" => backend.expire_now(),
            "/status" => {
                let snapshot = handle.snapshot().await?;
                delegate.display_status_message(&format!("{:?}", snapshot.phase));
            },
            body => {
                if let Err(e) = handle.send_message(body).await {
                    tracing::warn!(error = %e, "send failed");
                    delegate.display_error_message("Unable to send message");
                }
            },
        }
    }

    handle.shutdown().await;
    drop(handle);
    if let Err(e) = dispatcher.await {
        tracing::warn!(error = %e, "notification dispatch ended abnormally");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn token_login_does_not_need_identity() {
        let args = Args::try_parse_from(["quickchat", "--token", "tok123"]).unwrap();

        assert_eq!(args.identity, None);
        assert_eq!(args.token.as_deref(), Some("tok123"));
    }

    #[test]
    fn server_login_needs_identity() {
        assert!(Args::try_parse_from(["quickchat"]).is_err());
        assert!(Args::try_parse_from(["quickchat", "--token-url", "http://localhost/token"]).is_err());

        let args = Args::try_parse_from(["quickchat", "-i", "alice"]).unwrap();
        assert_eq!(args.identity.as_deref(), Some("alice"));
        assert_eq!(args.conversation, "general");
        assert_eq!(args.history_limit, 100);
    }

    #[test]
    fn token_and_endpoint_conflict() {
        let result = Args::try_parse_from([
            "quickchat",
            "--token",
            "tok123",
            "--token-url",
            "http://localhost/token",
        ]);
        assert!(result.is_err());
    }
}
