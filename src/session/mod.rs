pub mod message;

use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws::{self, ProtocolError, WebsocketContext};
use serde_json;
use uuid::Uuid;

use crate::room::actor::{HandleClientReconnect, RemoveClient, Room, SendToUpstream};
use message::{IncomingMessage, OutgoingMessage};

/// Opaque identifier for one downstream browser connection; scoped to a single Room's
/// membership, never persisted.
pub type SessionId = Uuid;

const HB_INTERVAL: Duration = Duration::from_secs(20);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// One downstream browser WebSocket connection.
///
/// Parses the small JSON control protocol on the way in (falling back to forwarding the raw
/// frame verbatim to the upstream link) and relays Room broadcasts back out as JSON frames.
pub struct Session {
    id: SessionId,
    room: Addr<Room>,
    league_id: String,
    draft_position: u32,
    hb: Instant,
}

impl Session {
    pub fn new(id: SessionId, room: Addr<Room>, league_id: String, draft_position: u32) -> Self {
        Self {
            id,
            room,
            league_id,
            draft_position,
            hb: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut <Self as Actor>::Context) {
        ctx.run_interval(HB_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                log::debug!(
                    "session {} (league {}) timed out waiting for a pong",
                    act.id,
                    act.league_id
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_text(&mut self, text: &str, ctx: &mut <Self as Actor>::Context) {
        match serde_json::from_str::<IncomingMessage>(text) {
            Ok(IncomingMessage::YahooMessage { data }) => {
                self.room.do_send(SendToUpstream { text: data });
            }
            Ok(IncomingMessage::YahooReconnect { data }) => {
                let room = self.room.clone();
                let session_addr = ctx.address();
                let league_id = data.league_id;
                let draft_position = data.draft_position;
                actix::spawn(async move {
                    let outcome = room
                        .send(HandleClientReconnect {
                            league_id,
                            draft_position,
                        })
                        .await;
                    if !matches!(outcome, Ok(Ok(()))) {
                        session_addr.do_send(ToClient(OutgoingMessage::YahooError {
                            error: "Failed to reconnect to Yahoo".to_string(),
                        }));
                    }
                });
            }
            Ok(IncomingMessage::Unknown) => {
                log::debug!("session {} ignoring unrecognised control frame type", self.id);
            }
            Err(_) => {
                // Not a recognised control envelope: forward it to the upstream verbatim.
                self.room.do_send(SendToUpstream {
                    text: text.to_string(),
                });
            }
        }
    }
}

impl Actor for Session {
    type Context = WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        self.room.do_send(crate::room::actor::AddClient {
            session_id: self.id,
            addr: ctx.address(),
            draft_position: self.draft_position,
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.room.do_send(RemoveClient {
            session_id: self.id,
        });
    }
}

impl StreamHandler<Result<ws::Message, ProtocolError>> for Session {
    fn handle(&mut self, item: Result<ws::Message, ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(bytes)) => {
                self.hb = Instant::now();
                if let Ok(text) = std::str::from_utf8(&bytes) {
                    self.handle_text(text, ctx);
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                log::error!("session {} websocket protocol error: {err}", self.id);
                ctx.stop();
            }
        }
    }
}

/// A frame pushed down to this session by its Room.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ToClient(pub OutgoingMessage);

impl Handler<ToClient> for Session {
    type Result = ();
    fn handle(&mut self, msg: ToClient, ctx: &mut Self::Context) -> Self::Result {
        ctx.text(msg.0);
    }
}

/// Forces this session's socket closed, e.g. when its Room retires or the process shuts down.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseSession {
    pub code: u16,
    pub reason: String,
}

impl Handler<CloseSession> for Session {
    type Result = ();
    fn handle(&mut self, msg: CloseSession, ctx: &mut Self::Context) -> Self::Result {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::from(msg.code),
            description: Some(msg.reason),
        }));
        ctx.stop();
    }
}
