use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Value};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{BindingConfig, GatekeeperConfig};
use gatekeeper::error::GatekeeperError;
use gatekeeper::intercept::{Interceptor, Invocation};
use gatekeeper::ratelimit::{CallArgs, RequestContext};
use gatekeeper::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// Replay a burst of guarded calls through the admission gate.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Redis URL; overrides the configured store
    #[arg(long)]
    redis_url: Option<String>,

    /// Operation to invoke
    #[arg(long, default_value = "smsService.sendSmsMessage")]
    operation: String,

    /// Business key carried in the `msgKey` field of the call
    #[arg(long, default_value = "register-user")]
    key: String,

    /// Number of calls to issue
    #[arg(long, default_value_t = 15)]
    calls: usize,

    /// Issue all calls at once instead of one after another
    #[arg(long)]
    concurrent: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Default)]
struct Summary {
    allowed: usize,
    limited: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => GatekeeperConfig::from_file(path)?,
        None => default_config(&args.operation),
    };
    if let Some(url) = &args.redis_url {
        config.store.url = Some(url.clone());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    let summary = match config.store.url.clone() {
        Some(url) => {
            let store = Arc::new(RedisCounterStore::connect(&url).await?);
            replay(&config, store, &args, &cancel).await?
        }
        None => {
            info!("No store URL configured, counting in process memory");
            let store = Arc::new(MemoryCounterStore::new());
            let purge = store.spawn_purge_task(config.store.purge_interval(), cancel.child_token());
            let summary = replay(&config, store, &args, &cancel).await;
            purge.abort();
            summary?
        }
    };

    info!(
        operation = %args.operation,
        allowed = summary.allowed,
        limited = summary.limited,
        failed = summary.failed,
        "Burst finished"
    );
    Ok(())
}

/// The binding used when no configuration file is given: 10 calls per 120s.
fn default_config(operation: &str) -> GatekeeperConfig {
    GatekeeperConfig {
        bindings: vec![BindingConfig {
            target: operation.to_string(),
            namespace: "smsService".to_string(),
            rule: "sendLimit".to_string(),
            limit_counts: 10,
            time_second: 120,
            key_field: "msgKey".to_string(),
            require_context: false,
        }],
        ..GatekeeperConfig::default()
    }
}

async fn replay<S: CounterStore + ?Sized>(
    config: &GatekeeperConfig,
    store: Arc<S>,
    args: &Args,
    cancel: &CancellationToken,
) -> anyhow::Result<Summary> {
    let interceptor = Interceptor::from_config(config, store)?;
    if interceptor.selection(&args.operation).is_none() {
        warn!(operation = %args.operation, "Operation has no binding, calls will not be limited");
    }

    let context = RequestContext::new(([127, 0, 0, 1], 0).into(), "/cli/replay");
    let call_args: Vec<Value> = vec![json!({
        "msgKey": args.key,
        "content": "register an user notice!",
    })];

    let send = |seq: usize| {
        let interceptor = &interceptor;
        let context = &context;
        let call_args = &call_args[..];
        async move {
            let invocation = Invocation::new(args.operation.as_str(), call_args)
                .with_context(context)
                .with_cancellation(cancel);
            interceptor
                .call(invocation, || send_message(seq, call_args))
                .await
        }
    };

    let results = if args.concurrent {
        futures::future::join_all((1..=args.calls).map(send)).await
    } else {
        let mut results = Vec::with_capacity(args.calls);
        for seq in 1..=args.calls {
            results.push(send(seq).await);
        }
        results
    };

    let mut summary = Summary::default();
    for result in results {
        match result {
            Ok(()) => summary.allowed += 1,
            Err(e) if e.is_rate_limited() => {
                warn!(error = %e, "Call rejected");
                summary.limited += 1;
            }
            Err(e) => {
                error!(error = %e, "Call failed");
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

async fn send_message(seq: usize, args: &CallArgs) -> Result<(), GatekeeperError> {
    info!(seq = seq, args = %args[0], "Message sent");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling pending retries");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling pending retries");
        }
    }
}
