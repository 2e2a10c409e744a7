//! Connection code verification.
//!
//! A session uses two connections. The first only carries the code check;
//! the second, opened after success, carries all application traffic. A
//! peer guessing codes never touches the data channel.
//!
//! # Handshake Sequence
//!
//! ```text
//! Client                                    Server
//!   |  ---- connect (verification) ---->      |
//!   |  ---- <6-digit code> ------------>      |
//!   |  <--- VERIFICATION_SUCCESS -------      |
//!   |       OR                                |
//!   |  <--- VERIFICATION_FAILED:<reason> -    |
//!   |  ---- close ----------------------      |
//!   |                                         |
//!   |  ---- connect (data) ------------>      |  (success only)
//! ```

use tokio::net::TcpListener;
use tokio::time::timeout;

use duosync_core::{ConnectionCode, VerificationResult};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::transport::{self, LineStream};

/// Reason sent to a client that presented the wrong code.
pub const INVALID_CODE_REASON: &str = "Invalid code";

/// Compare a candidate against the expected code.
pub fn verify_code(expected: &ConnectionCode, candidate: &str) -> VerificationResult {
    if expected.matches(candidate) {
        VerificationResult::Success
    } else {
        VerificationResult::failure(INVALID_CODE_REASON)
    }
}

/// Accept one verification connection and run the server side of the
/// exchange.
///
/// The connection is closed before returning, whatever the outcome.
pub async fn serve_verification(
    listener: &TcpListener,
    code: &ConnectionCode,
    config: &SessionConfig,
) -> Result<VerificationResult> {
    let mut conn = accept(listener, config).await?;
    let peer = conn.peer_addr();

    let outcome = exchange_as_server(&mut conn, code, config).await;
    conn.close();

    let result = outcome?;
    match &result {
        VerificationResult::Success => tracing::info!("peer {} presented a valid code", peer),
        VerificationResult::Failure { reason } => {
            tracing::warn!("peer {} failed verification: {}", peer, reason)
        }
    }
    Ok(result)
}

async fn exchange_as_server(
    conn: &mut LineStream,
    code: &ConnectionCode,
    config: &SessionConfig,
) -> Result<VerificationResult> {
    let candidate = timeout(config.handshake_timeout, conn.read_line())
        .await
        .map_err(|_| SessionError::Timeout("waiting for connection code".into()))??
        .ok_or(SessionError::PeerClosed)?;

    let result = verify_code(code, &candidate);
    conn.write_line(&result.encode()).await?;
    Ok(result)
}

/// Accept the data connection that follows a successful verification.
pub async fn accept_data_connection(
    listener: &TcpListener,
    config: &SessionConfig,
) -> Result<LineStream> {
    let conn = accept(listener, config).await?;
    tracing::debug!("accepted data connection from {}", conn.peer_addr());
    Ok(conn)
}

async fn accept(listener: &TcpListener, config: &SessionConfig) -> Result<LineStream> {
    let (stream, _) = timeout(config.accept_timeout, listener.accept())
        .await
        .map_err(|_| SessionError::Timeout("waiting for peer to connect".into()))??;
    Ok(LineStream::new(stream, config)?)
}

/// Run the client side of the exchange on a fresh verification connection.
///
/// Returns `Ok(())` only on `VERIFICATION_SUCCESS`; a rejection or any
/// unexpected line is a [`SessionError::VerificationFailure`].
pub async fn request_verification(
    address: &str,
    port: u16,
    code: &str,
    config: &SessionConfig,
) -> Result<()> {
    let mut conn = transport::connect(address, port, config).await?;
    let outcome = exchange_as_client(&mut conn, code).await;
    conn.close();
    outcome
}

async fn exchange_as_client(conn: &mut LineStream, code: &str) -> Result<()> {
    conn.write_line(code).await?;
    let response = conn.read_line().await?.ok_or(SessionError::PeerClosed)?;

    match VerificationResult::decode(&response) {
        Ok(VerificationResult::Success) => Ok(()),
        Ok(VerificationResult::Failure { reason }) => {
            Err(SessionError::VerificationFailure(reason))
        }
        Err(_) => Err(SessionError::VerificationFailure(format!(
            "unexpected response {response:?}"
        ))),
    }
}

/// Open the data connection after a successful verification.
pub async fn open_data_connection(
    address: &str,
    port: u16,
    config: &SessionConfig,
) -> Result<LineStream> {
    let conn = transport::connect(address, port, config).await?;
    tracing::debug!("opened data connection to {}", conn.peer_addr());
    Ok(conn)
}
