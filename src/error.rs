use thiserror::Error;

/// Error taxonomy shared by the Upstream Link, Room, and Connection Acceptor.
///
/// Every variant names the wire surface it is mirrored onto (a downstream close code, a
/// `yahoo_error` frame, or silence) — see each call site for how it is actually surfaced.
#[derive(Debug, Error, Clone)]
pub enum ProxyError {
    /// Missing or malformed query parameters on the downstream handshake.
    /// Surfaced as a downstream close with code 1008.
    #[error("Missing required parameters: leagueId, draftPosition, websocketUrl")]
    InvalidHandshake,

    /// The upstream dial timed out or was refused.
    /// Surfaced as `yahoo_error` followed by `yahoo_disconnected`.
    #[error("upstream dial failed: {0}")]
    UpstreamDialFailure(String),

    /// An I/O error occurred on an already-open upstream link.
    /// Surfaced the same way as [`ProxyError::UpstreamDialFailure`].
    #[error("upstream runtime error: {0}")]
    UpstreamRuntimeError(String),

    /// A reconnect request referenced a league different from the room's own.
    /// Surfaced as `yahoo_error` to the requesting session only.
    #[error("reconnect requested leagueId does not match this room")]
    LeagueMismatch,

    /// A send was attempted while the upstream link was not open.
    /// Logged and dropped; never surfaced to a downstream client.
    #[error("upstream link is not open")]
    NotOpen,
}
