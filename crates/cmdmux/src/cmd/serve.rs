use std::time::Duration;

use cmdmux_session::{
    CmdError, CommandRegistry, Conversation, Inbound, Payload, SessionConfig, SessionListener,
};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{io_error, session_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    let config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .map_err(|err| session_error("config rejected", err))?,
        None => SessionConfig::default(),
    };
    super::runtime()?.block_on(serve(args, config))
}

async fn serve(args: ServeArgs, config: SessionConfig) -> CliResult<i32> {
    let commands = demo_commands();
    let names = commands.names();
    let listener = SessionListener::bind(&args.path, Inbound::handler(commands))
        .map_err(|err| session_error("bind failed", err))?
        .with_session_config(config);
    info!(path = %listener.path().display(), ?names, "serving");

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    let mut connections = JoinSet::new();

    loop {
        if args
            .max_connections
            .is_some_and(|max| listener.accepted() >= max)
        {
            break;
        }
        tokio::select! {
            signal = &mut interrupted => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                info!("interrupted, dropping open connections");
                connections.shutdown().await;
                return Ok(SUCCESS);
            }
            accepted = listener.accept() => {
                let conn = accepted.map_err(|err| session_error("accept failed", err))?;
                connections.spawn(async move {
                    if let Err(err) = conn.closed().await {
                        warn!(error = %err, "connection ended with an error");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(accepted = listener.accepted(), "connection limit reached, draining");
    while connections.join_next().await.is_some() {}
    Ok(SUCCESS)
}

/// The commands `serve` answers.
pub fn demo_commands() -> CommandRegistry {
    CommandRegistry::new()
        .register("echo", echo)
        .register("sleep", sleep)
        .register("fail", fail)
        .register("ticks", ticks)
        .register_stream("count", count)
        .sub("sys", CommandRegistry::new().register("info", info_cmd))
}

/// Replies with the caller's arguments and keywords unchanged.
async fn echo(conv: Conversation) -> Result<Value, CmdError> {
    let reply = Payload {
        args: conv.args(),
        kw: conv.kw(),
    };
    conv.result(reply).await?;
    Ok(Value::Null)
}

/// Waits `seconds` (default 1) before replying with it.
async fn sleep(conv: Conversation) -> Result<Value, CmdError> {
    let seconds = conv.arg(0).and_then(|v| v.as_f64()).unwrap_or(1.0);
    if !(0.0..=3600.0).contains(&seconds) {
        return Err(CmdError::failed("ValueError", [json!("seconds out of range")]));
    }
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    Ok(json!(seconds))
}

async fn fail(conv: Conversation) -> Result<Value, CmdError> {
    let mut args = conv.args();
    if args.is_empty() {
        args.push(json!("requested failure"));
    }
    Err(CmdError::failed("Failed", args))
}

/// Streams `n` ticks (default 3), `interval_ms` apart, then replies with `n`.
async fn ticks(conv: Conversation) -> Result<Value, CmdError> {
    let n = conv.arg(0).and_then(|v| v.as_u64()).unwrap_or(3);
    let interval = conv.arg(1).and_then(|v| v.as_u64()).unwrap_or(0);
    let stream = conv.open_stream_out(Payload::single("ticks")).await?;
    for tick in 0..n {
        if interval > 0 && tick > 0 {
            tokio::time::sleep(Duration::from_millis(interval)).await;
        }
        stream.send(Payload::single(tick)).await?;
    }
    Ok(json!(n))
}

/// Counts the items a caller streams in and sums the numeric ones.
async fn count(conv: Conversation) -> Result<Value, CmdError> {
    let stream = conv.open_stream_in(Payload::single("ready")).await?;
    let mut items = 0u64;
    let mut sum = 0f64;
    while let Some(item) = stream.recv().await {
        let item = item?;
        items += 1;
        sum += item.get(0).and_then(Value::as_f64).unwrap_or(0.0);
    }
    Ok(json!({ "items": items, "sum": sum }))
}

async fn info_cmd(_conv: Conversation) -> Result<Value, CmdError> {
    Ok(json!({
        "name": "cmdmux",
        "version": env!("CARGO_PKG_VERSION"),
        "commands": demo_commands().names(),
    }))
}
