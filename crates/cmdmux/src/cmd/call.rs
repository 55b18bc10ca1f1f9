use std::path::Path;
use std::time::Duration;

use cmdmux_session::{connect, Inbound, Payload, Session, SessionError};
use serde_json::{Map, Value};
use tracing::debug;

use crate::cmd::CallArgs;
use crate::exit::{session_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{OutputFormat, Printer};

enum Mode {
    Call,
    Receive,
    Send(Vec<Payload>),
}

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let command = parse_command(&args.command);
    let payload = build_payload(&args.args, &args.kw)?;
    let mode = if args.stream {
        Mode::Receive
    } else if !args.send.is_empty() {
        Mode::Send(parse_items(&args.send)?)
    } else {
        Mode::Call
    };

    super::runtime()?.block_on(async {
        match tokio::time::timeout(timeout, call(&args.path, command, payload, mode, format)).await
        {
            Ok(result) => result,
            Err(_) => Err(CliError::new(
                TIMEOUT,
                format!("no reply within {}", args.timeout),
            )),
        }
    })
}

async fn call(
    path: &Path,
    command: Value,
    payload: Payload,
    mode: Mode,
    format: OutputFormat,
) -> CliResult<i32> {
    let conn = connect(path, Inbound::None)
        .await
        .map_err(|err| session_error("connect failed", err))?;

    let mut printer = Printer::new(format);
    let outcome = exchange(conn.session(), command, payload, mode, &mut printer).await;
    printer.finish();

    if let Err(err) = conn.close().await {
        debug!(error = %err, "connection did not close cleanly");
    }
    outcome.map(|()| SUCCESS)
}

async fn exchange(
    session: &Session,
    command: Value,
    payload: Payload,
    mode: Mode,
    printer: &mut Printer,
) -> CliResult<()> {
    let failed = |err: SessionError| session_error("call failed", err);
    match mode {
        Mode::Call => {
            let reply = session.cmd(command, payload).await.map_err(failed)?;
            printer.reply(&reply);
        }
        Mode::Receive => {
            let stream = session.stream_in(command, payload).await.map_err(failed)?;
            printer.initial(stream.initial());
            while let Some(item) = stream.recv().await {
                match item {
                    Ok(item) => printer.item(&item),
                    Err(err) => printer.warning(&err.to_string()),
                }
            }
            let reply = stream.finish().await.map_err(failed)?;
            printer.reply(&reply);
        }
        Mode::Send(items) => {
            let stream = session.stream_out(command, payload).await.map_err(failed)?;
            printer.initial(stream.initial());
            for item in items {
                stream.send(item).await.map_err(failed)?;
            }
            let reply = stream.finish().await.map_err(failed)?;
            printer.reply(&reply);
        }
    }
    Ok(())
}

/// `a.b.c` addresses a nested command; anything else is a plain name.
fn parse_command(input: &str) -> Value {
    if input.contains('.') {
        Value::Array(
            input
                .split('.')
                .map(|part| Value::String(part.to_string()))
                .collect(),
        )
    } else {
        Value::String(input.to_string())
    }
}

/// JSON if it parses, the raw text otherwise.
fn parse_value(input: &str) -> Value {
    serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()))
}

fn build_payload(args: &[String], kw: &[String]) -> CliResult<Payload> {
    let mut keywords = Map::new();
    for pair in kw {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::new(
                USAGE,
                format!("--kw expects KEY=VALUE, got {pair:?}"),
            ));
        };
        if key.is_empty() {
            return Err(CliError::new(USAGE, "--kw key must not be empty"));
        }
        keywords.insert(key.to_string(), parse_value(value));
    }
    Ok(Payload {
        args: args.iter().map(|arg| parse_value(arg)).collect(),
        kw: keywords,
    })
}

fn parse_items(items: &[String]) -> CliResult<Vec<Payload>> {
    items
        .iter()
        .map(|item| {
            serde_json::from_str::<Value>(item)
                .map(Payload::single)
                .map_err(|err| CliError::new(USAGE, format!("--send is not valid JSON: {err}")))
        })
        .collect()
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn dotted_commands_become_paths() {
        assert_eq!(parse_command("echo"), json!("echo"));
        assert_eq!(parse_command("sys.info"), json!(["sys", "info"]));
    }

    #[test]
    fn arguments_fall_back_to_text() {
        let payload = build_payload(
            &["1".into(), "hello".into(), "{\"a\":2}".into()],
            &["x=[1,2]".into(), "name=bob".into()],
        )
        .expect("payload");
        assert_eq!(payload.args, vec![json!(1), json!("hello"), json!({"a": 2})]);
        assert_eq!(payload.get_kw("x"), Some(&json!([1, 2])));
        assert_eq!(payload.get_kw("name"), Some(&json!("bob")));
    }

    #[test]
    fn malformed_keywords_are_usage_errors() {
        let err = build_payload(&[], &["novalue".into()]).expect_err("missing '='");
        assert_eq!(err.code, USAGE);
        let err = build_payload(&[], &["=1".into()]).expect_err("empty key");
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn send_items_must_be_json() {
        assert_eq!(parse_items(&["5".into()]).expect("items").len(), 1);
        assert_eq!(parse_items(&["{".into()]).expect_err("bad json").code, USAGE);
    }
}
