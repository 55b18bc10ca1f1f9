//! Pumping a session over a byte transport.

use cmdmux_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use cmdmux_transport::Transport;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Result, SessionError};
use crate::session::Session;

/// Run `session` over `io` until either side goes away.
///
/// Reads frames into [`Session::message_in`] and writes whatever
/// [`Session::message_out`] yields. When the transport closes or fails the
/// session is taken down; a clean EOF from the peer is not an error.
pub async fn run<T: Transport>(session: Session, io: T, config: FrameConfig) -> Result<()> {
    let (rd, wr) = tokio::io::split(io);
    let mut reader = FrameReader::with_config(rd, config.clone());
    let mut writer = FrameWriter::with_config(wr, config);

    let read_side = async {
        loop {
            match reader.read_message().await {
                Ok(msg) => {
                    trace!(id = msg.conversation_id(), "frame in");
                    session.message_in(msg);
                }
                Err(err) if err.is_recoverable() => {
                    warn!(error = %err, "skipping malformed message");
                }
                Err(err) => return Err(err),
            }
        }
    };

    let write_side = async {
        while let Some(msg) = session.message_out().await {
            trace!(id = msg.conversation_id(), "frame out");
            writer.write_message(&msg).await?;
        }
        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "transport shutdown failed");
        }
        Ok::<(), FrameError>(())
    };

    let outcome = tokio::select! {
        read = read_side => read,
        written = write_side => written,
    };

    let (reason, result) = match outcome {
        Ok(()) => ("session shut down".to_string(), Ok(())),
        Err(FrameError::ConnectionClosed) => ("connection closed".to_string(), Ok(())),
        Err(err) => (err.to_string(), Err(SessionError::Frame(err))),
    };
    debug!(%reason, "transport finished");
    session.link_down(&reason);
    result
}

/// Spawn [`run`] on the current runtime.
pub fn spawn<T: Transport>(session: Session, io: T, config: FrameConfig) -> Connection {
    let task = tokio::spawn(run(session.clone(), io, config));
    Connection { session, task }
}

/// A session with its transport task.
pub struct Connection {
    session: Session,
    task: JoinHandle<Result<()>>,
}

impl Connection {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Shut the session down and wait for the transport task.
    pub async fn close(self) -> Result<()> {
        self.session.shutdown().await;
        join(self.task).await
    }

    /// Wait until the transport closes on its own.
    pub async fn closed(self) -> Result<()> {
        let result = join(self.task).await;
        self.session.shutdown().await;
        result
    }
}

async fn join(task: JoinHandle<Result<()>>) -> Result<()> {
    match task.await {
        Ok(result) => result,
        Err(err) => Err(SessionError::LinkDown(format!("transport task failed: {err}"))),
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use cmdmux_frame::{FrameWriter, Message, Payload};
    use cmdmux_transport::memory_pair;
    use serde_json::{json, Value};
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::error::CmdError;
    use crate::session::Inbound;

    #[tokio::test]
    async fn call_over_memory_transport() {
        let (a, b) = memory_pair(4096);
        let server = spawn(
            Session::new(Inbound::handler(|conv: crate::Conversation| async move {
                Ok::<_, CmdError>(conv.arg(0).unwrap_or(Value::Null))
            })),
            b,
            FrameConfig::default(),
        );
        let client = spawn(Session::new(Inbound::None), a, FrameConfig::default());

        let reply = client
            .session()
            .cmd("echo", Payload::single("hello"))
            .await
            .expect("reply");
        assert_eq!(reply.args, vec![json!("hello")]);

        client.close().await.expect("client closes cleanly");
        server.closed().await.expect("server sees EOF");
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (a, mut b) = memory_pair(4096);
        let session = Session::new(Inbound::handler(|_conv: crate::Conversation| async move {
            Ok::<_, CmdError>(json!("pong"))
        }));
        let conn = spawn(session, a, FrameConfig::default());

        let mut raw = Vec::new();
        let mut buf = bytes::BytesMut::new();
        cmdmux_frame::encode_frame(br#"{"not":"a message"}"#, &mut buf).expect("encode");
        raw.extend_from_slice(&buf);
        b.write_all(&raw).await.expect("write garbage");

        let mut writer = FrameWriter::new(&mut b);
        writer
            .write_message(&Message::outgoing(-1, 0, Payload::single("ping")))
            .await
            .expect("write request");
        drop(writer);

        let mut reader = cmdmux_frame::FrameReader::new(&mut b);
        let reply = reader.read_message().await.expect("reply");
        assert_eq!(reply.payload.args, vec![json!("pong")]);
        drop(reader);

        drop(b);
        conn.closed().await.expect("EOF is a clean close");
    }

    #[tokio::test]
    async fn garbage_stream_takes_session_down() {
        let (a, mut b) = memory_pair(4096);
        let conn = spawn(Session::new(Inbound::None), a, FrameConfig::default());
        b.write_all(b"XXXXXXXXXXXX").await.expect("write garbage");
        let err = conn.closed().await.expect_err("bad magic is fatal");
        assert!(matches!(err, SessionError::Frame(FrameError::InvalidMagic)));
    }
}
