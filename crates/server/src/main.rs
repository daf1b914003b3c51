//! Process bootstrap and the stdio tool-dispatch loop — argument parsing,
//! logging init, signal handling, and exit codes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use infractl_provider::{BinaryCache, ProviderAdapter, RegistryClient};
use infractl_server::{cli, config::Config, logging, shutdown::install_signal_handlers, tools, Orchestrator};
use infractl_state::StateStore;

#[tokio::main]
#[instrument(name = "infractl_main")]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!("panicked: {panic_info}");
    }));

    if let Err(error) = run().await {
        eprintln!("{error:?}");
        std::process::exit(1);
    }
}

#[instrument]
async fn run() -> miette::Result<()> {
    let cli = cli::parse();
    logging::init(cli.log_format);

    let mut config = Config::from_env();
    if let Some(db_dir) = cli.db_dir {
        config.db_dir = db_dir;
    }
    if let Some(tmp_dir) = cli.tmp_dir {
        config.tmp_dir = tmp_dir;
    }

    let store = StateStore::open(config.state_db_path()).await.map_err(|e| miette::miette!("failed to open state store: {e}"))?;
    let registry = RegistryClient::new(config.registry_url.clone(), config.api_url.clone());
    let cache = BinaryCache::new(config.tmp_dir.clone(), registry);
    let adapter = ProviderAdapter::new(cache);
    let orchestrator = Arc::new(Orchestrator::new(adapter, store));

    let shutdown = install_signal_handlers();

    tokio::select! {
        biased;
        () = shutdown.wait_for_shutdown() => {
            info!("shutdown signal received");
        }
        result = serve(orchestrator.clone(), shutdown.token()) => {
            result.map_err(|e| miette::miette!("server error: {e}"))?;
        }
    }

    orchestrator.adapter().cleanup().await;
    Ok(())
}

/// One newline-delimited JSON tool call on stdin.
#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Json>,
    tool: String,
    #[serde(default)]
    args: Json,
    #[serde(default = "default_actor")]
    actor: String,
}

fn default_actor() -> String {
    "unknown".to_string()
}

/// One newline-delimited JSON response on stdout, echoing the request's
/// `id` (if any) alongside the tool response.
#[derive(Debug, Serialize)]
struct ResponseLine {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Json>,
    #[serde(flatten)]
    response: tools::ToolResponse,
}

type SharedStdout = Arc<Mutex<tokio::io::Stdout>>;

async fn write_line(stdout: &SharedStdout, line: &str) {
    let mut out = stdout.lock().await;
    if out.write_all(line.as_bytes()).await.is_ok() {
        let _ = out.write_all(b"\n").await;
        let _ = out.flush().await;
    }
}

/// Reads newline-delimited JSON tool calls from stdin, dispatches each as
/// its own task racing the shutdown token, and writes newline-delimited
/// JSON responses to stdout. Starts by advertising the tool table via a
/// `list-tools` bootstrap message.
async fn serve(orchestrator: Arc<Orchestrator>, shutdown_token: CancellationToken) -> miette::Result<()> {
    let stdout: SharedStdout = Arc::new(Mutex::new(tokio::io::stdout()));

    let bootstrap = serde_json::json!({ "tools": tools::list_tools() });
    write_line(&stdout, &serde_json::to_string(&bootstrap).unwrap_or_default()).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(|e| miette::miette!("failed to read stdin: {e}"))? {
        if line.trim().is_empty() {
            continue;
        }

        let orchestrator = orchestrator.clone();
        let stdout = stdout.clone();
        let token = shutdown_token.child_token();
        tokio::spawn(async move {
            handle_request(&orchestrator, &stdout, token, line).await;
        });
    }

    Ok(())
}

#[instrument(skip(orchestrator, stdout, line), fields(tool = tracing::field::Empty))]
async fn handle_request(orchestrator: &Arc<Orchestrator>, stdout: &SharedStdout, token: CancellationToken, line: String) {
    let request: Request = match serde_json::from_str(&line) {
        Ok(r) => r,
        Err(e) => {
            warn!("malformed request: {e}");
            let text = serde_json::to_string(&ResponseLine { id: None, response: tools::ToolResponse::error(format!("malformed request: {e}")) })
                .unwrap_or_default();
            write_line(stdout, &text).await;
            return;
        }
    };

    tracing::Span::current().record("tool", request.tool.as_str());

    let response = tokio::select! {
        biased;
        () = token.cancelled() => tools::ToolResponse::cancelled(),
        resp = tools::dispatch(orchestrator, &request.tool, &request.args, &request.actor) => resp,
    };

    let text = serde_json::to_string(&ResponseLine { id: request.id, response }).unwrap_or_default();
    write_line(stdout, &text).await;
}
