#![allow(dead_code)]

use std::time::Duration;

use cmdmux_frame::FrameConfig;
use cmdmux_session::{spawn, Connection, Inbound, Session, SessionConfig};
use cmdmux_transport::memory_pair;

pub const BUFFER: usize = 64 * 1024;

/// Two sessions talking over an in-memory pipe.
pub struct Link {
    pub client: Connection,
    pub server: Connection,
}

impl Link {
    pub fn new(server_inbound: Inbound) -> Self {
        Self::with_configs(
            Inbound::None,
            SessionConfig::default(),
            server_inbound,
            SessionConfig::default(),
        )
    }

    pub fn with_configs(
        client_inbound: Inbound,
        client_config: SessionConfig,
        server_inbound: Inbound,
        server_config: SessionConfig,
    ) -> Self {
        let (a, b) = memory_pair(BUFFER);
        let client = Session::with_config(client_config, client_inbound).expect("client config");
        let server = Session::with_config(server_config, server_inbound).expect("server config");
        Self {
            client: spawn(client, a, FrameConfig::default()),
            server: spawn(server, b, FrameConfig::default()),
        }
    }

    pub fn client(&self) -> &Session {
        self.client.session()
    }

    pub fn server(&self) -> &Session {
        self.server.session()
    }
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
