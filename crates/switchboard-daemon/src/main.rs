//! switchboard-daemon - serve agent sessions to remote clients over WebSocket.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::{distributions::Alphanumeric, Rng};
use switchboard_core::engine::{ProcessEngine, ProcessEngineConfig};
use switchboard_core::{paths, AppContext};
use switchboard_http::{BridgeConfig, DEFAULT_PORT};

#[derive(Debug, Parser)]
#[command(
    name = "switchboard-daemon",
    version,
    about = "Drive several agent sessions at once and bridge them to WebSocket clients."
)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "SWITCHBOARD_PORT")]
    port: u16,

    /// Shared secret clients must present; random when unset
    #[arg(long, env = "SWITCHBOARD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Don't serve the secret on /token
    #[arg(long)]
    no_token_endpoint: bool,

    /// Directory of persisted sessions offered for resume
    #[arg(long, value_name = "PATH", env = "SWITCHBOARD_SESSIONS_DIR")]
    sessions_dir: Option<PathBuf>,

    /// Agent executable speaking JSON lines on stdio
    #[arg(long, value_name = "COMMAND", env = "SWITCHBOARD_AGENT_COMMAND")]
    agent_command: String,

    /// Extra argument for the agent (repeatable)
    #[arg(long = "agent-arg", value_name = "ARG", allow_hyphen_values = true)]
    agent_args: Vec<String>,

    /// Model for sessions created without one
    #[arg(long, default_value = "", env = "SWITCHBOARD_DEFAULT_MODEL")]
    default_model: String,

    /// Per-connection wait when closing clients at shutdown
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    shutdown_timeout_ms: u64,

    /// Write per-session agent transcripts here
    #[arg(long, value_name = "PATH")]
    log_dir: Option<PathBuf>,
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut engine_config = ProcessEngineConfig::new(args.agent_command).args(args.agent_args);
    if let Some(dir) = args.log_dir.or_else(paths::logs_dir) {
        engine_config = engine_config.log_dir(dir);
    }
    let engine = Arc::new(ProcessEngine::new(engine_config));
    engine.start().await?;

    let sessions_dir = args
        .sessions_dir
        .or_else(paths::sessions_dir)
        .ok_or("Cannot determine the sessions directory; pass --sessions-dir")?;
    log::info!("Reading persisted sessions from {}", sessions_dir.display());

    let ctx = AppContext::builder(engine)
        .sessions_dir(sessions_dir)
        .default_model(args.default_model)
        .build();

    let token = args.token.filter(|t| !t.is_empty()).unwrap_or_else(generate_token);
    let config = BridgeConfig {
        port: args.port,
        token: Some(token),
        serve_token_endpoint: !args.no_token_endpoint,
        shutdown_timeout: Duration::from_millis(args.shutdown_timeout_ms),
    };
    if config.serve_token_endpoint {
        log::info!("Clients can fetch the token from /token");
    }

    let mut handle = switchboard_http::start(ctx.clone(), config).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("Received Ctrl+C, shutting down");

    handle.stop().await;
    ctx.registry.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args =
            Args::try_parse_from(["switchboard-daemon", "--agent-command", "agent"]).unwrap();
        assert_eq!(args.port, DEFAULT_PORT);
        assert!(!args.no_token_endpoint);
        assert_eq!(args.shutdown_timeout_ms, 2000);
        assert!(args.agent_args.is_empty());
    }

    #[test]
    fn repeated_agent_args_keep_order() {
        let args = Args::try_parse_from([
            "switchboard-daemon",
            "--agent-command",
            "agent",
            "--agent-arg",
            "--stdio",
            "--agent-arg",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(args.agent_args, vec!["--stdio", "--verbose"]);
    }

    #[test]
    fn agent_command_is_required() {
        std::env::remove_var("SWITCHBOARD_AGENT_COMMAND");
        assert!(Args::try_parse_from(["switchboard-daemon"]).is_err());
    }

    #[test]
    fn generated_token_is_32_alphanumeric() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }
}
