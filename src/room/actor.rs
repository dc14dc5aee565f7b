//! The per-league actor that owns one Upstream Link and fans its traffic out to every
//! downstream client currently watching that league's draft.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use actix::prelude::*;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;

use crate::error::ProxyError;
use crate::room::RoomRegistry;
use crate::session::message::OutgoingMessage;
use crate::session::{CloseSession, Session, SessionId, ToClient};
use crate::upstream::{LinkId, LinkState, UpstreamLink};

/// How long a Room waits, after its last client leaves, before tearing itself down.
const RETIREMENT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Mirrors `encodeURIComponent`'s reserved set: everything non-alphanumeric except
/// `- _ . ! ~ * ' ( )`, which it leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

fn compose_join_frame(league_id: &str, draft_position: u32, platform_user_id: &str) -> String {
    let user_agent = format!("YahooFantasyProxy/1.0 ({platform_user_id})");
    let encoded = percent_encoding::utf8_percent_encode(&user_agent, URI_COMPONENT).to_string();
    format!("8|{league_id}|{draft_position}|{encoded}|")
}

struct ClientEntry {
    session_id: SessionId,
    addr: Addr<Session>,
    draft_position: u32,
}

/// Arguments needed to construct a brand new Room; supplied by the Connection Acceptor via
/// `GetOrCreateRoom`.
pub struct NewRoomArgs {
    pub league_id: String,
    pub upstream_url: String,
    pub platform_user_id: String,
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
}

/// Owns the state for one fantasy league's draft room: its client roster, its single Upstream
/// Link, and the timers that drive heartbeats and retirement.
pub struct Room {
    league_id: String,
    primary_draft_position: u32,
    upstream_url: String,
    platform_user_id: String,
    upstream: Option<UpstreamLink>,
    next_link_id: LinkId,
    clients: Vec<ClientEntry>,
    has_sent_join: bool,
    last_heartbeat_at: Option<SystemTime>,
    reconnect_attempts: u32,
    intentional_disconnect: bool,
    heartbeat_handle: Option<SpawnHandle>,
    retire_handle: Option<SpawnHandle>,
    registry: Addr<RoomRegistry>,
    heartbeat_interval: Duration,
    connection_timeout: Duration,
}

impl Room {
    pub fn new(args: NewRoomArgs, registry: Addr<RoomRegistry>) -> Self {
        Self {
            league_id: args.league_id,
            primary_draft_position: 0,
            upstream_url: args.upstream_url,
            platform_user_id: args.platform_user_id,
            upstream: None,
            next_link_id: 0,
            clients: Vec::new(),
            has_sent_join: false,
            last_heartbeat_at: None,
            reconnect_attempts: 0,
            intentional_disconnect: false,
            heartbeat_handle: None,
            retire_handle: None,
            registry,
            heartbeat_interval: args.heartbeat_interval,
            connection_timeout: args.connection_timeout,
        }
    }

    fn current_link_id(&self) -> Option<LinkId> {
        self.upstream.as_ref().map(|link| link.id)
    }

    fn broadcast(&self, frame: OutgoingMessage) {
        for client in &self.clients {
            client.addr.do_send(ToClient(frame.clone()));
        }
    }

    /// Drops the current link (if any), marking its close intentional, and clears the bookkeeping
    /// that belongs to the link being replaced. Does not start a new one.
    fn drop_upstream(&mut self, ctx: &mut Context<Self>, reason: &str) {
        if let Some(mut link) = self.upstream.take() {
            link.close(1000, reason.to_string(), true);
        }
        if let Some(handle) = self.heartbeat_handle.take() {
            ctx.cancel_future(handle);
        }
        self.has_sent_join = false;
        self.intentional_disconnect = false;
    }

    fn ensure_upstream_connected(&mut self, ctx: &mut Context<Self>) {
        let id = self.next_link_id;
        self.next_link_id += 1;
        let mut link = UpstreamLink::new(id);
        link.connect(ctx.address(), self.upstream_url.clone(), self.connection_timeout);
        self.upstream = Some(link);
    }

    fn start_heartbeat(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.heartbeat_handle.take() {
            ctx.cancel_future(handle);
        }
        let interval = self.heartbeat_interval;
        let handle = ctx.run_interval(interval, |act, _ctx| {
            if let Some(link) = &act.upstream {
                if link.state == LinkState::Open {
                    if link.send("c".to_string()).is_ok() {
                        act.last_heartbeat_at = Some(SystemTime::now());
                    }
                }
            }
        });
        self.heartbeat_handle = Some(handle);
    }

    fn close_all_clients(&mut self, ctx: &mut Context<Self>, code: u16, reason: String) {
        for client in self.clients.drain(..) {
            client.addr.do_send(CloseSession {
                code,
                reason: reason.clone(),
            });
        }
        if let Some(mut link) = self.upstream.take() {
            link.close(1000, reason, true);
        }
        if let Some(handle) = self.heartbeat_handle.take() {
            ctx.cancel_future(handle);
        }
        if let Some(handle) = self.retire_handle.take() {
            ctx.cancel_future(handle);
        }
        ctx.stop();
    }
}

impl Actor for Room {
    type Context = Context<Self>;

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.registry.do_send(super::RemoveRoom {
            league_id: self.league_id.clone(),
            addr: ctx.address(),
        });
    }
}

/// Adds a client to the room, forcing a fresh Upstream Link when one already has members or an
/// open link (every client arrival gets its own join burst).
#[derive(Message)]
#[rtype(result = "()")]
pub struct AddClient {
    pub session_id: SessionId,
    pub addr: Addr<Session>,
    pub draft_position: u32,
}

impl Handler<AddClient> for Room {
    type Result = ();

    fn handle(&mut self, msg: AddClient, ctx: &mut Self::Context) -> Self::Result {
        if let Some(handle) = self.retire_handle.take() {
            ctx.cancel_future(handle);
        }

        let needs_reinit = !self.clients.is_empty()
            || self.upstream.as_ref().is_some_and(|link| link.state == LinkState::Open);
        if needs_reinit {
            self.drop_upstream(ctx, "new client joined — forcing reconnection");
        }

        self.primary_draft_position = msg.draft_position;
        self.clients.push(ClientEntry {
            session_id: msg.session_id,
            addr: msg.addr.clone(),
            draft_position: msg.draft_position,
        });

        self.ensure_upstream_connected(ctx);

        msg.addr.do_send(ToClient(OutgoingMessage::RoomJoined {
            room_id: self.league_id.clone(),
            yahoo_connected: false,
            clients_count: self.clients.len(),
            draft_position: msg.draft_position,
        }));
    }
}

/// Removes a client. When the last client leaves, starts the retirement grace timer.
#[derive(Message)]
#[rtype(result = "()")]
pub struct RemoveClient {
    pub session_id: SessionId,
}

impl Handler<RemoveClient> for Room {
    type Result = ();

    fn handle(&mut self, msg: RemoveClient, ctx: &mut Self::Context) -> Self::Result {
        self.clients.retain(|client| client.session_id != msg.session_id);
        if self.clients.is_empty() && self.retire_handle.is_none() {
            let handle = ctx.run_later(RETIREMENT_GRACE_PERIOD, |act, ctx| {
                act.intentional_disconnect = true;
                if let Some(mut link) = act.upstream.take() {
                    link.close(1000, "room retirement", true);
                }
                if let Some(handle) = act.heartbeat_handle.take() {
                    ctx.cancel_future(handle);
                }
                act.retire_handle = None;
                ctx.stop();
            });
            self.retire_handle = Some(handle);
        }
    }
}

/// Forwards a downstream client's payload straight to the upstream link, if one is open.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendToUpstream {
    pub text: String,
}

impl Handler<SendToUpstream> for Room {
    type Result = ();

    fn handle(&mut self, msg: SendToUpstream, _ctx: &mut Self::Context) -> Self::Result {
        match &self.upstream {
            Some(link) => {
                if let Err(err) = link.send(msg.text) {
                    log::warn!("league {}: {err}, dropping downstream frame", self.league_id);
                }
            }
            None => {
                log::warn!(
                    "league {}: upstream not open, dropping downstream frame",
                    self.league_id
                );
            }
        }
    }
}

/// A client asked the room to tear down its current upstream link and dial a fresh one,
/// optionally under a new draft position.
#[derive(Message)]
#[rtype(result = "Result<(), ProxyError>")]
pub struct HandleClientReconnect {
    pub league_id: String,
    pub draft_position: u32,
}

impl Handler<HandleClientReconnect> for Room {
    type Result = Result<(), ProxyError>;

    fn handle(&mut self, msg: HandleClientReconnect, ctx: &mut Self::Context) -> Self::Result {
        if msg.league_id != self.league_id {
            return Err(ProxyError::LeagueMismatch);
        }
        self.primary_draft_position = msg.draft_position;
        self.drop_upstream(ctx, "client-initiated reconnection");
        self.ensure_upstream_connected(ctx);
        Ok(())
    }
}

/// Reported by an Upstream Link's background task once the dial succeeds.
#[derive(Message)]
#[rtype(result = "()")]
pub struct UpstreamOpened {
    pub link_id: LinkId,
}

impl Handler<UpstreamOpened> for Room {
    type Result = ();

    fn handle(&mut self, msg: UpstreamOpened, ctx: &mut Self::Context) -> Self::Result {
        if self.current_link_id() != Some(msg.link_id) {
            return;
        }
        self.reconnect_attempts = 0;
        let frame = compose_join_frame(
            &self.league_id,
            self.primary_draft_position,
            &self.platform_user_id,
        );
        if let Some(link) = self.upstream.as_mut() {
            link.mark_open();
            match link.send(frame) {
                Ok(()) => self.has_sent_join = true,
                Err(err) => log::warn!("league {}: {err}, join frame not sent", self.league_id),
            }
        }
        self.start_heartbeat(ctx);
        self.broadcast(OutgoingMessage::YahooConnected {
            message: "Connected to Yahoo WebSocket".to_string(),
        });
    }
}

/// Reported for every upstream text frame while the link is open.
#[derive(Message)]
#[rtype(result = "()")]
pub struct UpstreamMessage {
    pub link_id: LinkId,
    pub data: String,
}

impl Handler<UpstreamMessage> for Room {
    type Result = ();

    fn handle(&mut self, msg: UpstreamMessage, _ctx: &mut Self::Context) -> Self::Result {
        if self.current_link_id() != Some(msg.link_id) {
            return;
        }
        self.broadcast(OutgoingMessage::YahooMessage { data: msg.data });
    }
}

/// Reported on a transport-level error on the upstream link, ahead of its terminal
/// [`UpstreamClosed`].
#[derive(Message)]
#[rtype(result = "()")]
pub struct UpstreamError {
    pub link_id: LinkId,
    pub message: String,
}

impl Handler<UpstreamError> for Room {
    type Result = ();

    fn handle(&mut self, msg: UpstreamError, _ctx: &mut Self::Context) -> Self::Result {
        if self.current_link_id() != Some(msg.link_id) {
            return;
        }
        self.broadcast(OutgoingMessage::YahooError { error: msg.message });
    }
}

/// Reported once an upstream link's background task has fully wound down. Always broadcast,
/// even for a link that has already been superseded, since this is that link's only terminal
/// notification; only state mutation is gated on the link still being the current one.
#[derive(Message)]
#[rtype(result = "()")]
pub struct UpstreamClosed {
    pub link_id: LinkId,
    pub code: u16,
    pub reason: String,
}

impl Handler<UpstreamClosed> for Room {
    type Result = ();

    fn handle(&mut self, msg: UpstreamClosed, ctx: &mut Self::Context) -> Self::Result {
        if self.current_link_id() == Some(msg.link_id) {
            if let Some(handle) = self.heartbeat_handle.take() {
                ctx.cancel_future(handle);
            }
            self.has_sent_join = false;
            self.upstream = None;
        }
        self.broadcast(OutgoingMessage::YahooDisconnected {
            code: msg.code,
            reason: msg.reason,
        });
    }
}

/// Snapshot of a room's state for the Status Surface.
#[derive(Debug, Clone, Serialize, MessageResponse)]
pub struct RoomStatus {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "leagueId")]
    pub league_id: String,
    #[serde(rename = "draftPosition")]
    pub draft_position: u32,
    #[serde(rename = "platformUserId")]
    pub platform_user_id: String,
    #[serde(rename = "clientsCount")]
    pub clients_count: usize,
    #[serde(rename = "clientDraftPositions")]
    pub client_draft_positions: Vec<u32>,
    #[serde(rename = "yahooConnected")]
    pub yahoo_connected: bool,
    #[serde(rename = "hasJoined")]
    pub has_joined: bool,
    #[serde(rename = "lastHeartbeat")]
    pub last_heartbeat: Option<u64>,
    #[serde(rename = "reconnectAttempts")]
    pub reconnect_attempts: u32,
    #[serde(rename = "isIntentionalDisconnect")]
    pub is_intentional_disconnect: bool,
}

#[derive(Message)]
#[rtype(result = "RoomStatus")]
pub struct GetStatus;

impl Handler<GetStatus> for Room {
    type Result = RoomStatus;

    fn handle(&mut self, _msg: GetStatus, _ctx: &mut Self::Context) -> Self::Result {
        RoomStatus {
            room_id: self.league_id.clone(),
            league_id: self.league_id.clone(),
            draft_position: self.primary_draft_position,
            platform_user_id: self.platform_user_id.clone(),
            clients_count: self.clients.len(),
            client_draft_positions: self.clients.iter().map(|c| c.draft_position).collect(),
            yahoo_connected: self
                .upstream
                .as_ref()
                .is_some_and(|link| link.state == LinkState::Open),
            has_joined: self.has_sent_join,
            last_heartbeat: self
                .last_heartbeat_at
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
            reconnect_attempts: self.reconnect_attempts,
            is_intentional_disconnect: self.intentional_disconnect,
        }
    }
}

/// Forces this room closed from the Status Surface: every client is sent a 1001 close and the
/// room retires regardless of grace period.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ForceRetire;

impl Handler<ForceRetire> for Room {
    type Result = ();

    fn handle(&mut self, _msg: ForceRetire, ctx: &mut Self::Context) -> Self::Result {
        self.close_all_clients(ctx, 1001, "Room force cleanup".to_string());
    }
}

/// Broadcast by the process bootstrap on shutdown; identical to [`ForceRetire`] but with a
/// distinct reason string for diagnostics.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown {
    pub code: u16,
    pub reason: String,
}

impl Handler<Shutdown> for Room {
    type Result = ();

    fn handle(&mut self, msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        self.close_all_clients(ctx, msg.code, msg.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_uses_pipe_delimited_fields() {
        let frame = compose_join_frame("12345", 3, "user-a");
        assert_eq!(frame, "8|12345|3|YahooFantasyProxy%2F1.0%20(user-a)|");
    }

    #[test]
    fn join_frame_percent_encodes_reserved_characters_like_encode_uri_component() {
        let frame = compose_join_frame("1", 1, "a b/c");
        assert!(frame.contains("a%20b%2Fc"));
        // unreserved characters used by encodeURIComponent stay bare
        assert!(frame.contains("YahooFantasyProxy%2F1.0%20(a%20b%2Fc)"));
    }
}
