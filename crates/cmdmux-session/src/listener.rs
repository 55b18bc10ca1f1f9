use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use cmdmux_frame::FrameConfig;
use cmdmux_transport::UnixDomainSocket;
use tracing::info;

use crate::config::SessionConfig;
use crate::driver::{self, Connection};
use crate::error::Result;
use crate::session::{Inbound, Session};

/// Listens for peers and starts a session per connection.
pub struct SessionListener {
    socket: UnixDomainSocket,
    inbound: Inbound,
    session_config: SessionConfig,
    frame_config: FrameConfig,
    accepted: AtomicU64,
}

impl SessionListener {
    /// Bind to a Unix domain socket path. Every accepted session treats
    /// incoming conversations according to `inbound`.
    pub fn bind(path: impl AsRef<Path>, inbound: Inbound) -> Result<Self> {
        let socket = UnixDomainSocket::bind(path)?;
        Ok(Self {
            socket,
            inbound,
            session_config: SessionConfig::default(),
            frame_config: FrameConfig::default(),
            accepted: AtomicU64::new(0),
        })
    }

    /// Override session limits. Validated on the next accept.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Override framing limits.
    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame_config = config;
        self
    }

    /// Accept the next connection and start its session.
    pub async fn accept(&self) -> Result<Connection> {
        let session = Session::with_config(self.session_config.clone(), self.inbound.clone())?;
        let stream = self.socket.accept().await?;
        let n = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        info!(connection = n, path = %self.path().display(), "accepted connection");
        Ok(driver::spawn(session, stream, self.frame_config.clone()))
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use cmdmux_frame::Payload;
    use serde_json::json;

    use super::*;
    use crate::connector::connect;
    use crate::error::SessionError;

    fn make_sock_path(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/cmdl-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("listener.sock")
    }

    #[tokio::test]
    async fn accepts_multiple_sequential_connections() {
        let sock_path = make_sock_path("multi");
        let listener = SessionListener::bind(&sock_path, Inbound::Queue).expect("listener should bind");

        let _c1 = connect(&sock_path, Inbound::None).await.expect("first client");
        let _s1 = listener.accept().await.expect("first accept");
        let _c2 = connect(&sock_path, Inbound::None).await.expect("second client");
        let _s2 = listener.accept().await.expect("second accept");
        assert_eq!(listener.accepted(), 2);

        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[tokio::test]
    async fn listener_without_commands_refuses_calls() {
        let sock_path = make_sock_path("nocmds");
        let listener = SessionListener::bind(&sock_path, Inbound::None).expect("listener should bind");
        let server = tokio::spawn(async move {
            let conn = listener.accept().await.expect("accept");
            conn.closed().await
        });

        let client = connect(&sock_path, Inbound::None).await.expect("client");
        let err = client
            .session()
            .cmd("anything", Payload::single(json!(1)))
            .await
            .expect_err("peer has no commands");
        assert!(matches!(err, SessionError::NoCommands));

        client.close().await.expect("close");
        server.await.expect("server task").expect("clean close");
        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn invalid_session_config_fails_on_accept() {
        let sock_path = make_sock_path("badcfg");
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let _guard = rt.enter();
        let listener = SessionListener::bind(&sock_path, Inbound::None)
            .expect("listener should bind")
            .with_session_config(SessionConfig {
                send_queue_len: 0,
                ..SessionConfig::default()
            });
        let err = rt
            .block_on(listener.accept())
            .expect_err("zero send queue is invalid");
        assert!(matches!(err, SessionError::Config(_)));
        if let Some(parent) = sock_path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
