mod common;

use std::time::Duration;

use cmdmux_frame::{B_ERROR, B_STREAM};
use cmdmux_session::{
    CmdError, Conversation, Inbound, Payload, RemoteError, Session, SessionConfig, SessionError,
    Signal, StreamDir, StreamState,
};
use serde_json::{json, Value};

use common::{eventually, Link};

/// Streams `count` integers after an initial "start", then returns "end".
fn counter(conv: Conversation) -> cmdmux_session::HandlerFuture {
    Box::pin(async move {
        let count = conv.arg(0).and_then(|v| v.as_i64()).unwrap_or(0);
        let stream = conv.open_stream_out(Payload::single("start")).await?;
        for n in 0..count {
            stream.send(Payload::single(n)).await?;
        }
        Ok::<_, CmdError>(json!("end"))
    })
}

/// Sums everything the caller streams in.
fn summer(conv: Conversation) -> cmdmux_session::HandlerFuture {
    Box::pin(async move {
        let stream = conv.open_stream_in(Payload::single("ready")).await?;
        let mut sum = 0;
        while let Some(item) = stream.recv().await {
            sum += item?.as_single_int().unwrap_or(0);
        }
        Ok::<_, CmdError>(json!(sum))
    })
}

/// Echoes every streamed item back.
fn mirror(conv: Conversation) -> cmdmux_session::HandlerFuture {
    Box::pin(async move {
        let stream = conv.open_stream_both(Payload::new()).await?;
        let mut seen = 0;
        while let Some(item) = stream.recv().await {
            stream.send(item?).await?;
            seen += 1;
        }
        Ok::<_, CmdError>(json!(seen))
    })
}

#[tokio::test]
async fn stream_in_delivers_items_in_order() {
    let link = Link::new(Inbound::handler(counter));
    let stream = link
        .client()
        .stream_in("count", Payload::single(30))
        .await
        .expect("stream opens");
    assert_eq!(stream.initial().args, vec![json!("start")]);

    let mut items = Vec::new();
    while let Some(item) = stream.recv().await {
        items.push(item.expect("item").as_single_int().expect("int"));
    }
    assert_eq!(items, (0..30).collect::<Vec<_>>());

    let last = stream.finish().await.expect("final reply");
    assert_eq!(last.args, vec![json!("end")]);
    eventually("both sides released", || {
        link.client().live_conversations() == 0 && link.server().live_conversations() == 0
    })
    .await;
}

#[tokio::test]
async fn stream_out_feeds_the_handler() {
    let link = Link::new(Inbound::handler(summer));
    let stream = link
        .client()
        .stream_out("sum", Payload::new())
        .await
        .expect("stream opens");
    assert_eq!(stream.initial().args, vec![json!("ready")]);
    for n in 1..=10 {
        stream.send(Payload::single(n)).await.expect("send");
    }
    let total = stream.finish().await.expect("final reply");
    assert_eq!(total.args, vec![json!(55)]);
}

#[tokio::test]
async fn small_inbox_throttles_the_sender() {
    let server_config = SessionConfig {
        inbox_len: 4,
        ..SessionConfig::default()
    };
    let link = Link::with_configs(
        Inbound::None,
        SessionConfig::default(),
        Inbound::handler(summer),
        server_config,
    );
    let stream = link
        .client()
        .stream_out("sum", Payload::new())
        .await
        .expect("stream opens");
    for n in 1..=200 {
        stream.send(Payload::single(n)).await.expect("send");
    }
    assert!(stream.take_warnings().is_empty());
    let total = stream.finish().await.expect("final reply");
    assert_eq!(total.args, vec![json!(20100)]);
}

#[tokio::test]
async fn bidirectional_stream_echoes() {
    let link = Link::new(Inbound::handler(mirror));
    let stream = link
        .client()
        .stream_both("mirror", Payload::new())
        .await
        .expect("stream opens");
    for word in ["a", "b", "c"] {
        stream.send(Payload::single(word)).await.expect("send");
        let echoed = stream
            .recv()
            .await
            .expect("echo arrives")
            .expect("not an error");
        assert_eq!(echoed.args, vec![json!(word)]);
    }
    let seen = stream.finish().await.expect("final reply");
    assert_eq!(seen.args, vec![json!(3)]);
}

#[tokio::test]
async fn plain_reply_to_a_stream_request() {
    let link = Link::new(Inbound::handler(|_conv: Conversation| async move {
        Ok::<_, CmdError>(json!("done"))
    }));
    let stream = link
        .client()
        .stream_in("plain", Payload::new())
        .await
        .expect("opens");
    assert_eq!(stream.initial().args, vec![json!("done")]);
    assert_eq!(stream.stream_in_state(), StreamState::End);
    assert!(stream.recv().await.is_none());
    let last = stream.finish().await.expect("finish");
    assert_eq!(last.args, vec![json!("done")]);
    eventually("server released", || link.server().live_conversations() == 0).await;
}

#[tokio::test]
async fn warnings_arrive_in_stream_order() {
    let link = Link::new(Inbound::handler(|conv: Conversation| async move {
        let stream = conv.open_stream_out(Payload::new()).await?;
        stream.send(Payload::single(1)).await?;
        stream
            .warn(RemoteError::new("Careful", [json!("slow disk")]).to_payload())
            .await?;
        stream.send(Payload::single(2)).await?;
        Ok::<_, CmdError>(Value::Null)
    }));
    let stream = link
        .client()
        .stream_in("warn", Payload::new())
        .await
        .expect("opens");
    let first = stream.recv().await.expect("item").expect("data");
    assert_eq!(first.args, vec![json!(1)]);
    match stream.recv().await.expect("warning") {
        Err(SessionError::Remote(err)) => assert_eq!(err.name, "Careful"),
        other => panic!("expected a warning, got {other:?}"),
    }
    let second = stream.recv().await.expect("item").expect("data");
    assert_eq!(second.args, vec![json!(2)]);
    assert!(stream.recv().await.is_none());
    stream.finish().await.expect("finish");
}

#[tokio::test]
async fn send_without_outgoing_stream_is_refused() {
    let link = Link::new(Inbound::handler(counter));
    let stream = link
        .client()
        .stream_in("count", Payload::single(1))
        .await
        .expect("opens");
    let err = stream
        .send(Payload::single("nope"))
        .await
        .expect_err("incoming-only stream");
    assert!(matches!(err, SessionError::NotStreaming));
    while stream.recv().await.is_some() {}
    stream.finish().await.expect("finish");
}

#[tokio::test]
async fn dropping_a_stream_cancels_the_producer() {
    let link = Link::new(Inbound::handler(|conv: Conversation| async move {
        let stream = conv.open_stream_out(Payload::new()).await?;
        for n in 0..100_000 {
            stream.send(Payload::single(n)).await?;
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        Ok::<_, CmdError>(Value::Null)
    }));
    let stream = link
        .client()
        .stream(StreamDir::In, "forever", Payload::new(), Some(16))
        .await
        .expect("opens");
    stream.recv().await.expect("first item").expect("data");
    drop(stream);

    eventually("producer stopped", || link.server().live_conversations() == 0).await;
    assert_eq!(link.client().live_conversations(), 0);
}

#[tokio::test]
async fn handler_declines_a_stream() {
    let link = Link::new(Inbound::handler(|conv: Conversation| async move {
        match conv.no_stream().await {
            Err(SessionError::WantsStream) => Err(CmdError::failed("Refused", [json!("stream")])),
            other => Ok(json!(format!("{other:?}"))),
        }
    }));

    let plain = link.client().cmd("x", Payload::new()).await.expect("plain call");
    assert_eq!(plain.args, vec![json!("Ok(())")]);

    let err = link
        .client()
        .stream_out("x", Payload::new())
        .await
        .expect_err("stream refused");
    assert!(matches!(err, SessionError::NoStream));
}

#[tokio::test]
async fn streamed_tuples_arrive_in_send_order() {
    let link = Link::new(Inbound::handler(|conv: Conversation| async move {
        assert_eq!(conv.args(), vec![json!(123)]);
        let stream = conv.open_stream_in(Payload::new()).await?;
        let mut seen = Vec::new();
        while let Some(item) = stream.recv().await {
            seen.push(item?.args);
        }
        if seen != vec![
            vec![json!(1), json!("a")],
            vec![json!(3), json!("def")],
            vec![json!(2), json!("bc")],
        ] {
            return Err(CmdError::failed("Unordered", [json!(seen)]));
        }
        stream.result(Payload::single("OK").arg(4)).await?;
        Ok::<_, CmdError>(Value::Null)
    }));

    let stream = link
        .client()
        .stream_out("Test", Payload::single(123))
        .await
        .expect("opens");
    for (n, text) in [(1, "a"), (3, "def"), (2, "bc")] {
        stream
            .send(Payload::single(n).arg(text))
            .await
            .expect("send");
    }
    let last = stream.finish().await.expect("final reply");
    assert_eq!(last.args, vec![json!("OK"), json!(4)]);
}

#[tokio::test]
async fn sends_fail_once_the_reader_has_replied() {
    let server_config = SessionConfig {
        inbox_len: 4,
        ..SessionConfig::default()
    };
    let link = Link::with_configs(
        Inbound::None,
        SessionConfig::default(),
        Inbound::handler(|conv: Conversation| async move {
            let stream = conv.open_stream_in(Payload::new()).await?;
            let first = match stream.recv().await {
                Some(item) => item?.as_single_int(),
                None => None,
            };
            Ok::<_, CmdError>(json!(first))
        }),
        server_config,
    );
    let stream = link
        .client()
        .stream_out("first", Payload::new())
        .await
        .expect("opens");

    let mut refused = None;
    for n in 0..50 {
        let sent = tokio::time::timeout(Duration::from_secs(5), stream.send(Payload::single(n)))
            .await
            .expect("send does not hang");
        if let Err(err) = sent {
            refused = Some(err);
            break;
        }
    }
    assert!(matches!(refused, Some(SessionError::NoStream)), "{refused:?}");
    assert_eq!(stream.stream_in_state(), StreamState::End);
    assert_eq!(stream.stream_out_state(), StreamState::Off);

    let last = tokio::time::timeout(Duration::from_secs(5), stream.finish())
        .await
        .expect("finish does not hang")
        .expect("final reply");
    assert_eq!(last.args, vec![json!(0)]);
    eventually("both sides released", || {
        link.client().live_conversations() == 0 && link.server().live_conversations() == 0
    })
    .await;
}

#[tokio::test]
async fn finishing_early_stops_the_producer() {
    let link = Link::new(Inbound::handler(|conv: Conversation| async move {
        let stream = conv.open_stream_out(Payload::new()).await?;
        for n in 0..1000 {
            stream.send(Payload::single(n)).await?;
        }
        Ok::<_, CmdError>(json!("all sent"))
    }));
    let stream = link
        .client()
        .stream(StreamDir::In, "produce", Payload::new(), Some(4))
        .await
        .expect("opens");
    let first = stream.recv().await.expect("item").expect("data");
    assert_eq!(first.args, vec![json!(0)]);

    let last = tokio::time::timeout(Duration::from_secs(5), stream.finish())
        .await
        .expect("finish does not hang");
    assert!(matches!(last, Err(SessionError::NoStream)), "{last:?}");
    eventually("both sides released", || {
        link.client().live_conversations() == 0 && link.server().live_conversations() == 0
    })
    .await;
}

#[tokio::test]
async fn inbox_overflow_is_reported_as_skip() {
    let reader = Session::new(Inbound::None);
    let writer = Session::new(Inbound::Queue);

    let opening = tokio::spawn({
        let reader = reader.clone();
        async move {
            reader
                .stream(StreamDir::In, "flood", Payload::new(), Some(4))
                .await
        }
    });
    let open = reader.message_out().await.expect("opening message");
    writer.message_in(open);
    // Withhold the initial grant so the writer is not credit-limited.
    let grant = reader.message_out().await.expect("grant");
    assert_eq!(Signal::from_payload(&grant.payload), Some(Signal::Flow(4)));

    let conv = writer
        .next_incoming()
        .await
        .expect("queue mode")
        .expect("incoming conversation");
    let producer = conv.open_stream_out(Payload::single("go")).await.expect("opens");
    reader.message_in(writer.message_out().await.expect("initial reply"));
    let stream = opening.await.expect("task").expect("stream");

    for n in 0..6 {
        producer.send(Payload::single(n)).await.expect("send");
        reader.message_in(writer.message_out().await.expect("item"));
    }

    let first = stream.recv().await.expect("item").expect("data");
    assert_eq!(first.args, vec![json!(0)]);
    let skip = reader.message_out().await.expect("skip notice");
    assert_eq!(skip.id_and_flags & (B_STREAM | B_ERROR), B_STREAM | B_ERROR);
    assert_eq!(Signal::from_payload(&skip.payload), Some(Signal::Skip));

    writer.message_in(skip);
    let warnings = producer.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(warnings[0], SessionError::Skipped));
}
