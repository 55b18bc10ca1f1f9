mod common;

use cmdmux_session::{
    CmdError, CommandRegistry, Conversation, Inbound, Payload, Session, SessionError,
};
use serde_json::{json, Value};

use common::{eventually, Link};

fn backend() -> CommandRegistry {
    CommandRegistry::new()
        .register("echo", |conv: Conversation| async move {
            Ok::<_, CmdError>(conv.arg(0).unwrap_or(Value::Null))
        })
        .register("count", |conv: Conversation| async move {
            let count = conv.arg(0).and_then(|v| v.as_i64()).unwrap_or(0);
            let stream = conv.open_stream_out(Payload::single("start")).await?;
            for n in 0..count {
                stream.send(Payload::single(n)).await?;
            }
            Ok::<_, CmdError>(json!("end"))
        })
        .register("hold", |conv: Conversation| async move {
            conv.cancelled().await;
            Ok::<_, CmdError>(Value::Null)
        })
}

/// Relays every incoming conversation to `upstream` under the same command.
fn relay(upstream: Session) -> Inbound {
    Inbound::handler(move |conv: Conversation| {
        let upstream = upstream.clone();
        async move {
            let cmd = conv.cmd().unwrap_or(Value::Null);
            conv.forward(&upstream, cmd)?;
            Ok::<_, CmdError>(Value::Null)
        }
    })
}

#[tokio::test]
async fn forwarded_call_reaches_the_backend() {
    let back = Link::new(Inbound::handler(backend()));
    let front = Link::new(relay(back.client().clone()));

    let reply = front
        .client()
        .cmd("echo", Payload::single("hi"))
        .await
        .expect("reply through relay");
    assert_eq!(reply.args, vec![json!("hi")]);

    eventually("relay routes released", || {
        front.server().live_conversations() == 0 && back.client().live_conversations() == 0
    })
    .await;
}

#[tokio::test]
async fn forwarded_errors_keep_their_meaning() {
    let back = Link::new(Inbound::handler(backend()));
    let front = Link::new(relay(back.client().clone()));

    let err = front
        .client()
        .cmd("missing", Payload::new())
        .await
        .expect_err("backend has no such command");
    assert!(matches!(
        err,
        SessionError::NoCommand { index: 0, name: Some(ref n) } if n == "missing"
    ));
}

#[tokio::test]
async fn forwarded_stream_relays_every_item() {
    let back = Link::new(Inbound::handler(backend()));
    let front = Link::new(relay(back.client().clone()));

    let stream = front
        .client()
        .stream_in("count", Payload::single(5))
        .await
        .expect("stream through relay");
    assert_eq!(stream.initial().args, vec![json!("start")]);
    let mut items = Vec::new();
    while let Some(item) = stream.recv().await {
        items.push(item.expect("data").as_single_int().expect("int"));
    }
    assert_eq!(items, vec![0, 1, 2, 3, 4]);
    let last = stream.finish().await.expect("final reply");
    assert_eq!(last.args, vec![json!("end")]);

    eventually("relay routes released", || {
        front.server().live_conversations() == 0 && back.client().live_conversations() == 0
    })
    .await;
    eventually("backend released", || back.server().live_conversations() == 0).await;
}

#[tokio::test]
async fn backend_loss_stops_the_caller() {
    let Link {
        client: upstream,
        server: backend_conn,
    } = Link::new(Inbound::handler(backend()));
    let front = Link::new(relay(upstream.session().clone()));

    let caller = front.client().clone();
    let call = tokio::spawn(async move { caller.cmd("hold", Payload::new()).await });
    eventually("call reached the backend", || {
        backend_conn.session().live_conversations() == 1
    })
    .await;

    backend_conn.close().await.expect("backend closes");
    let err = call.await.expect("task").expect_err("backend went away");
    assert!(matches!(err, SessionError::Stopped));
    eventually("relay route dropped", || front.server().live_conversations() == 0).await;
    assert!(upstream.session().is_down());
}
