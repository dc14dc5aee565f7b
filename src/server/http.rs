//! Connection Acceptor (the single downstream WS upgrade route) plus the thin HTTP Status
//! Surface used for operational visibility into live rooms.

use actix::{Actor, ActorContext, Addr, StreamHandler};
use actix_web::{web, App, Error as ActixError, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws::{self, ProtocolError, WebsocketContext};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::room::actor::{ForceRetire, GetStatus, RoomStatus};
use crate::room::{GetOrCreateRoom, ListRooms, RoomHandle, RoomList, RoomRegistry, SwapIfUrlChanged};
use crate::session::Session;

#[derive(Deserialize)]
struct ConnectionQuery {
    #[serde(rename = "leagueId")]
    league_id: Option<String>,
    #[serde(rename = "draftPosition")]
    draft_position: Option<String>,
    #[serde(rename = "websocketUrl")]
    websocket_url: Option<String>,
    #[serde(rename = "platformUserId")]
    platform_user_id: Option<String>,
}

struct ValidatedConnection {
    league_id: String,
    draft_position: u32,
    websocket_url: String,
    platform_user_id: String,
}

fn validate(query: ConnectionQuery) -> Result<ValidatedConnection, ()> {
    let league_id = query.league_id.filter(|s| !s.is_empty()).ok_or(())?;
    let websocket_url = query.websocket_url.filter(|s| !s.is_empty()).ok_or(())?;
    let draft_position = query
        .draft_position
        .as_deref()
        .ok_or(())?
        .parse::<u32>()
        .ok()
        .filter(|p| *p >= 1)
        .ok_or(())?;
    let platform_user_id = query
        .platform_user_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    Ok(ValidatedConnection {
        league_id,
        draft_position,
        websocket_url,
        platform_user_id,
    })
}

/// Stands in for a real [`Session`] just long enough to close the just-upgraded socket with
/// 1008, since a WebSocket close code can only be sent after the handshake completes.
struct HandshakeReject {
    reason: String,
}

impl Actor for HandshakeReject {
    type Context = WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::from(1008u16),
            description: Some(std::mem::take(&mut self.reason)),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ProtocolError>> for HandshakeReject {
    fn handle(&mut self, _item: Result<ws::Message, ProtocolError>, _ctx: &mut Self::Context) {}
}

async fn socket(
    req: HttpRequest,
    payload: web::Payload,
    query: web::Query<ConnectionQuery>,
    registry: web::Data<Addr<RoomRegistry>>,
) -> Result<HttpResponse, ActixError> {
    let conn = match validate(query.into_inner()) {
        Ok(conn) => conn,
        Err(()) => {
            log::warn!("rejecting handshake: missing or invalid required parameters");
            return ws::start(
                HandshakeReject {
                    reason: crate::error::ProxyError::InvalidHandshake.to_string(),
                },
                &req,
                payload,
            );
        }
    };

    registry
        .send(SwapIfUrlChanged {
            league_id: conn.league_id.clone(),
            upstream_url: conn.websocket_url.clone(),
        })
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let RoomHandle(room) = registry
        .send(GetOrCreateRoom {
            league_id: conn.league_id.clone(),
            upstream_url: conn.websocket_url,
            platform_user_id: conn.platform_user_id,
        })
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let session_id = Uuid::new_v4();
    let session = Session::new(session_id, room, conn.league_id, conn.draft_position);
    ws::start(session, &req, payload)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(rename = "activeRooms")]
    active_rooms: usize,
    #[serde(rename = "totalClients")]
    total_clients: usize,
    rooms: Vec<String>,
}

async fn health(registry: web::Data<Addr<RoomRegistry>>) -> Result<HttpResponse, ActixError> {
    let RoomList(rooms) = registry
        .send(ListRooms)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    let mut total_clients = 0usize;
    let mut ids = Vec::with_capacity(rooms.len());
    for (league_id, addr) in &rooms {
        if let Ok(status) = addr.send(GetStatus).await {
            total_clients += status.clients_count;
        }
        ids.push(league_id.clone());
    }
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        active_rooms: rooms.len(),
        total_clients,
        rooms: ids,
    }))
}

#[derive(Serialize)]
struct RoomsResponse {
    #[serde(rename = "totalRooms")]
    total_rooms: usize,
    rooms: Vec<RoomStatus>,
}

async fn list_rooms(registry: web::Data<Addr<RoomRegistry>>) -> Result<HttpResponse, ActixError> {
    let RoomList(rooms) = registry
        .send(ListRooms)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    let mut statuses = Vec::with_capacity(rooms.len());
    for (_, addr) in &rooms {
        if let Ok(status) = addr.send(GetStatus).await {
            statuses.push(status);
        }
    }
    Ok(HttpResponse::Ok().json(RoomsResponse {
        total_rooms: statuses.len(),
        rooms: statuses,
    }))
}

async fn room_status(
    path: web::Path<String>,
    registry: web::Data<Addr<RoomRegistry>>,
) -> Result<HttpResponse, ActixError> {
    let league_id = path.into_inner();
    let RoomList(rooms) = registry
        .send(ListRooms)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    let Some((_, addr)) = rooms.into_iter().find(|(id, _)| *id == league_id) else {
        return Ok(HttpResponse::NotFound().finish());
    };
    match addr.send(GetStatus).await {
        Ok(status) => Ok(HttpResponse::Ok().json(status)),
        Err(_) => Ok(HttpResponse::NotFound().finish()),
    }
}

async fn force_retire(
    path: web::Path<String>,
    registry: web::Data<Addr<RoomRegistry>>,
) -> Result<HttpResponse, ActixError> {
    let league_id = path.into_inner();
    let RoomList(rooms) = registry
        .send(ListRooms)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    let Some((_, addr)) = rooms.into_iter().find(|(id, _)| *id == league_id) else {
        return Ok(HttpResponse::NotFound().finish());
    };
    addr.do_send(ForceRetire);
    Ok(HttpResponse::NoContent().finish())
}

/// Boots the HTTP server, wires a ctrl-c shutdown hook that closes every downstream session with
/// code 1001 before the listener itself stops, and runs until that listener exits.
pub async fn start(config: Config) -> std::io::Result<()> {
    let registry = RoomRegistry::new(config.heartbeat_interval, config.connection_timeout).start();
    let shutdown_registry = registry.clone();
    let shutdown_timeout_secs = config.shutdown_timeout.as_secs();
    let port = config.port;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .route("/yahoo/websocket/connection", web::get().to(socket))
            .route("/health", web::get().to(health))
            .route("/rooms", web::get().to(list_rooms))
            .route("/rooms/{id}/status", web::get().to(room_status))
            .route("/rooms/{id}", web::delete().to(force_retire))
    })
        .disable_signals()
        .shutdown_timeout(shutdown_timeout_secs)
        .bind(("0.0.0.0", port))?
        .run();

    let server_handle = server.handle();
    actix::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        log::info!("shutdown signal received, closing downstream sessions");
        if let Ok(RoomList(rooms)) = shutdown_registry.send(ListRooms).await {
            for (_, addr) in rooms {
                addr.do_send(crate::room::actor::Shutdown {
                    code: 1001,
                    reason: "Server shutdown".to_string(),
                });
            }
        }
        server_handle.stop(true).await;
    });

    server.await
}
