use std::path::Path;

use cmdmux_frame::FrameConfig;
#[cfg(unix)]
use cmdmux_transport::UnixDomainSocket;
use tracing::debug;

use crate::config::SessionConfig;
use crate::driver::{self, Connection};
use crate::error::Result;
use crate::session::{Inbound, Session};

/// Connect to a listening peer over a Unix domain socket.
pub async fn connect(path: impl AsRef<Path>, inbound: Inbound) -> Result<Connection> {
    connect_with_config(
        path,
        inbound,
        SessionConfig::default(),
        FrameConfig::default(),
    )
    .await
}

/// Connect with explicit session and framing configuration.
pub async fn connect_with_config(
    path: impl AsRef<Path>,
    inbound: Inbound,
    session_config: SessionConfig,
    frame_config: FrameConfig,
) -> Result<Connection> {
    #[cfg(not(unix))]
    {
        let _ = (inbound, session_config, frame_config);
        let path = path.as_ref().to_path_buf();
        return Err(cmdmux_transport::TransportError::Connect {
            path,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "cmdmux sockets require Unix domain sockets",
            ),
        }
        .into());
    }

    #[cfg(unix)]
    {
        let session = Session::with_config(session_config, inbound)?;
        let stream = UnixDomainSocket::connect(path.as_ref()).await?;
        debug!(path = %path.as_ref().display(), "connected");
        Ok(driver::spawn(session, stream, frame_config))
    }
}
