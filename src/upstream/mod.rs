//! The proxy's outbound WebSocket to the third-party draft service for one room.
//!
//! An [`UpstreamLink`] is a thin, synchronous handle held by a [`crate::room::actor::Room`].
//! The actual socket I/O runs on a detached task (spawned via [`actix::spawn`]) so that dialing,
//! reading, and writing never block the Room's actor mailbox; the task reports back to the Room
//! exclusively through the typed messages in [`crate::room::actor`], which keeps every piece of
//! Room state serialized behind the actor's mailbox as required by the concurrency model.

use std::time::Duration;

use actix::Addr;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::room::actor::{Room, UpstreamClosed, UpstreamError, UpstreamMessage, UpstreamOpened};

/// Identifies one Upstream Link instance. A fresh id is minted by the owning Room for every
/// connect attempt, so stale events from a superseded link can be told apart from current ones.
pub type LinkId = u64;

const DIAL_USER_AGENT: &str = "YahooFantasyProxy/1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

enum LinkCommand {
    Send(String),
    Close(u16, String),
}

/// Handle to one outbound upstream WebSocket connection.
///
/// State transitions are monotonic within a single instance; calling [`UpstreamLink::connect`]
/// again never rewinds an already-connecting-or-open link, and [`UpstreamLink::close`] is
/// terminal. A fresh instance (with a fresh [`LinkId`]) is created for every new attempt.
pub struct UpstreamLink {
    pub id: LinkId,
    pub state: LinkState,
    pub intentional_disconnect: bool,
    tx: Option<mpsc::UnboundedSender<LinkCommand>>,
}

impl UpstreamLink {
    pub fn new(id: LinkId) -> Self {
        Self {
            id,
            state: LinkState::Idle,
            intentional_disconnect: false,
            tx: None,
        }
    }

    /// Idempotent: a link already `connecting` or `open` is left untouched.
    pub fn connect(&mut self, room_addr: Addr<Room>, url: String, dial_timeout: Duration) {
        if matches!(self.state, LinkState::Connecting | LinkState::Open) {
            return;
        }
        self.state = LinkState::Connecting;
        self.intentional_disconnect = false;
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        actix::spawn(run_link(self.id, url, dial_timeout, room_addr, rx));
    }

    /// Marks the link `open`. Called by the Room once it has observed [`UpstreamOpened`] for
    /// this link's id — the background task does not mutate this struct directly.
    pub fn mark_open(&mut self) {
        self.state = LinkState::Open;
    }

    pub fn send(&self, text: String) -> Result<(), crate::error::ProxyError> {
        if self.state != LinkState::Open {
            return Err(crate::error::ProxyError::NotOpen);
        }
        match &self.tx {
            Some(tx) => {
                let _ = tx.send(LinkCommand::Send(text));
                Ok(())
            }
            None => Err(crate::error::ProxyError::NotOpen),
        }
    }

    /// Requests the link close, asking the background task to send the given close code and
    /// reason to the upstream socket. `intentional` records whether the Room itself initiated
    /// the close (forced re-init, client reconnect, or retirement) as opposed to a peer close or
    /// transport error.
    pub fn close(&mut self, code: u16, reason: impl Into<String>, intentional: bool) {
        if intentional {
            self.intentional_disconnect = true;
        }
        if self.state == LinkState::Closed {
            return;
        }
        self.state = LinkState::Closing;
        if let Some(tx) = &self.tx {
            let _ = tx.send(LinkCommand::Close(code, reason.into()));
        }
    }
}

fn build_request(
    url: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, String> {
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    // Deliberately no Origin header: this is what lets the proxy dial upstream as a
    // same-origin-unrestricted client on behalf of browsers that could not dial it directly.
    let headers = request.headers_mut();
    headers.remove(header::ORIGIN);
    headers.insert(header::USER_AGENT, HeaderValue::from_static(DIAL_USER_AGENT));
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(request)
}

async fn run_link(
    id: LinkId,
    url: String,
    dial_timeout: Duration,
    room_addr: Addr<Room>,
    mut rx: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let request = match build_request(&url) {
        Ok(request) => request,
        Err(message) => {
            room_addr.do_send(UpstreamError {
                link_id: id,
                message: crate::error::ProxyError::UpstreamDialFailure(message).to_string(),
            });
            room_addr.do_send(UpstreamClosed {
                link_id: id,
                code: 0,
                reason: "dial failed".to_string(),
            });
            return;
        }
    };

    let dial = tokio::time::timeout(dial_timeout, tokio_tungstenite::connect_async(request)).await;

    let ws_stream = match dial {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(err)) => {
            room_addr.do_send(UpstreamError {
                link_id: id,
                message: crate::error::ProxyError::UpstreamDialFailure(err.to_string()).to_string(),
            });
            room_addr.do_send(UpstreamClosed {
                link_id: id,
                code: 0,
                reason: "dial failed".to_string(),
            });
            return;
        }
        Err(_elapsed) => {
            room_addr.do_send(UpstreamError {
                link_id: id,
                message: crate::error::ProxyError::UpstreamDialFailure(
                    "dial timed out".to_string(),
                )
                .to_string(),
            });
            room_addr.do_send(UpstreamClosed {
                link_id: id,
                code: 0,
                reason: "dial failed".to_string(),
            });
            return;
        }
    };

    room_addr.do_send(UpstreamOpened { link_id: id });

    let (mut write, mut read) = ws_stream.split();
    let mut close_code: u16 = 1000;
    let mut close_reason = String::new();

    'relay: loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(LinkCommand::Send(text)) => {
                        if write.send(WsMessage::Text(text.into())).await.is_err() {
                            close_reason = "upstream write failed".to_string();
                            break 'relay;
                        }
                    }
                    Some(LinkCommand::Close(code, reason)) => {
                        let frame = tokio_tungstenite::tungstenite::protocol::CloseFrame {
                            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        let _ = write.send(WsMessage::Close(Some(frame))).await;
                        close_reason = reason;
                        break 'relay;
                    }
                    None => break 'relay,
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        room_addr.do_send(UpstreamMessage {
                            link_id: id,
                            data: text.to_string(),
                        });
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        if let Some(frame) = frame {
                            close_code = frame.code.into();
                            close_reason = frame.reason.to_string();
                        }
                        break 'relay;
                    }
                    Some(Ok(_)) => {
                        // binary/ping/pong/frame: the upstream protocol this proxy speaks
                        // to draft services is text-only.
                    }
                    Some(Err(err)) => {
                        room_addr.do_send(UpstreamError {
                            link_id: id,
                            message: crate::error::ProxyError::UpstreamRuntimeError(
                                err.to_string(),
                            )
                            .to_string(),
                        });
                        close_reason = err.to_string();
                        break 'relay;
                    }
                    None => {
                        close_reason = "upstream closed the connection".to_string();
                        break 'relay;
                    }
                }
            }
        }
    }

    room_addr.do_send(UpstreamClosed {
        link_id: id,
        code: close_code,
        reason: close_reason,
    });
}
