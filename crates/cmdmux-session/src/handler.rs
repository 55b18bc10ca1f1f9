//! Running incoming conversations.

use std::future::Future;
use std::sync::Arc;

use cmdmux_frame::{Payload, B_ERROR};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, debug_span, error, Instrument};

use crate::conversation::{Conversation, StreamState};
use crate::error::CmdError;
use crate::signal::Signal;

/// What a handler resolves to: the final reply value, or an error sent to
/// the peer in its place.
pub type HandlerFuture = BoxFuture<'static, Result<Value, CmdError>>;

/// Processes conversations opened by the peer.
///
/// The returned value becomes the final reply unless the handler already
/// replied itself (then it should return `Value::Null`).
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, conv: Conversation) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Conversation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CmdError>> + Send + 'static,
{
    fn handle(&self, conv: Conversation) -> HandlerFuture {
        Box::pin(self(conv))
    }
}

/// Drive one handler to completion and deliver its outcome.
///
/// Cancellation of the conversation aborts the handler. A panicking
/// handler is reported to the peer as a `Panic` error.
pub(crate) async fn run(handler: Arc<dyn Handler>, conv: Conversation) {
    let span = debug_span!("handler", id = conv.id());
    async move {
        let token = conv.cancel_token();
        let work = tokio::spawn(handler.handle(conv.clone()).in_current_span());
        let abort = work.abort_handle();
        let outcome = tokio::select! {
            joined = work => match joined {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => {
                    let text = panic_text(err.into_panic());
                    error!(panic = %text, "handler panicked");
                    Err(CmdError::failed("Panic", [Value::String(text)]))
                }
                Err(_) => Err(CmdError::Signal(Signal::Cancel)),
            },
            _ = token.cancelled() => {
                abort.abort();
                debug!("handler cancelled");
                Err(CmdError::Signal(Signal::Cancel))
            }
        };
        finalize(&conv, outcome).await;
    }
    .instrument(span)
    .await
}

async fn finalize(conv: &Conversation, outcome: Result<Value, CmdError>) {
    if conv.stream_out_state() == StreamState::End {
        match outcome {
            Ok(Value::Null) => {}
            Ok(value) => debug!(%value, "reply already sent, dropping result"),
            Err(CmdError::Signal(sig)) => debug!(%sig, "reply already sent, dropping signal"),
            Err(err) => error!(error = %err, "reply already sent, error not delivered"),
        }
    } else {
        let sent = match outcome {
            Ok(value) => conv.result(Payload::single(value)).await,
            Err(err) => {
                debug!(error = %err, "handler failed");
                conv.transmit(B_ERROR, err.to_payload()).await
            }
        };
        if let Err(err) = sent {
            debug!(error = %err, "handler outcome not sent");
        }
    }
    conv.drop_inbox();
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}
