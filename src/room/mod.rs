//! Process-wide directory of leagueId -> Room, handed out through a single registry actor so
//! the set of live rooms is never touched from more than one place at once.

pub mod actor;

use std::time::Duration;

use actix::prelude::*;

use actor::{ForceRetire, NewRoomArgs, Room};

struct RoomEntry {
    addr: Addr<Room>,
    upstream_url: String,
}

pub struct RoomRegistry {
    rooms: ahash::HashMap<String, RoomEntry>,
    heartbeat_interval: Duration,
    connection_timeout: Duration,
}

impl RoomRegistry {
    pub fn new(heartbeat_interval: Duration, connection_timeout: Duration) -> Self {
        Self {
            rooms: crate::utils::new_fast_hashmap(64),
            heartbeat_interval,
            connection_timeout,
        }
    }
}

impl Actor for RoomRegistry {
    type Context = Context<Self>;
}

/// Carries the Room's [`Addr`] out of the registry, which needs a custom `MessageResponse` impl
/// since `Addr<T>` has none of its own.
#[derive(MessageResponse)]
pub struct RoomHandle(pub Addr<Room>);

#[derive(Message)]
#[rtype(result = "RoomHandle")]
pub struct GetOrCreateRoom {
    pub league_id: String,
    pub upstream_url: String,
    pub platform_user_id: String,
}

impl Handler<GetOrCreateRoom> for RoomRegistry {
    type Result = RoomHandle;

    fn handle(&mut self, msg: GetOrCreateRoom, ctx: &mut Self::Context) -> Self::Result {
        if let Some(entry) = self.rooms.get(&msg.league_id) {
            return RoomHandle(entry.addr.clone());
        }
        let args = NewRoomArgs {
            league_id: msg.league_id.clone(),
            upstream_url: msg.upstream_url.clone(),
            platform_user_id: msg.platform_user_id,
            heartbeat_interval: self.heartbeat_interval,
            connection_timeout: self.connection_timeout,
        };
        let addr = Room::new(args, ctx.address()).start();
        self.rooms.insert(
            msg.league_id,
            RoomEntry {
                addr: addr.clone(),
                upstream_url: msg.upstream_url,
            },
        );
        RoomHandle(addr)
    }
}

/// If a room already exists for `league_id` under a different upstream URL, force-retires it so
/// the next `GetOrCreateRoom` for the same league starts fresh.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SwapIfUrlChanged {
    pub league_id: String,
    pub upstream_url: String,
}

impl Handler<SwapIfUrlChanged> for RoomRegistry {
    type Result = ();

    fn handle(&mut self, msg: SwapIfUrlChanged, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(entry) = self.rooms.get(&msg.league_id) {
            if entry.upstream_url != msg.upstream_url {
                entry.addr.do_send(ForceRetire);
                self.rooms.remove(&msg.league_id);
            }
        }
    }
}

/// Sent by a stopping Room's own `stopped()` hook, carrying its own `Addr` so the registry can
/// tell a genuinely-retired room apart from one already superseded by a newer room under the
/// same `league_id` (see `SwapIfUrlChanged`).
#[derive(Message)]
#[rtype(result = "()")]
pub struct RemoveRoom {
    pub league_id: String,
    pub addr: Addr<Room>,
}

impl Handler<RemoveRoom> for RoomRegistry {
    type Result = ();

    fn handle(&mut self, msg: RemoveRoom, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(entry) = self.rooms.get(&msg.league_id) {
            if entry.addr == msg.addr {
                self.rooms.remove(&msg.league_id);
            }
        }
    }
}

#[derive(MessageResponse)]
pub struct RoomList(pub Vec<(String, Addr<Room>)>);

#[derive(Message)]
#[rtype(result = "RoomList")]
pub struct ListRooms;

impl Handler<ListRooms> for RoomRegistry {
    type Result = RoomList;

    fn handle(&mut self, _msg: ListRooms, _ctx: &mut Self::Context) -> Self::Result {
        RoomList(
            self.rooms
                .iter()
                .map(|(league_id, entry)| (league_id.clone(), entry.addr.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(league_id: &str, url: &str) -> GetOrCreateRoom {
        GetOrCreateRoom {
            league_id: league_id.to_string(),
            upstream_url: url.to_string(),
            platform_user_id: "user-a".to_string(),
        }
    }

    #[actix_rt::test]
    async fn get_or_create_returns_the_same_room_twice() {
        let registry = RoomRegistry::new(Duration::from_secs(30), Duration::from_secs(10)).start();
        let RoomHandle(first) = registry.send(args("1", "wss://example.test")).await.unwrap();
        let RoomHandle(second) = registry.send(args("1", "wss://example.test")).await.unwrap();
        assert_eq!(first, second);
    }

    #[actix_rt::test]
    async fn different_leagues_get_different_rooms() {
        let registry = RoomRegistry::new(Duration::from_secs(30), Duration::from_secs(10)).start();
        let RoomHandle(first) = registry.send(args("1", "wss://example.test")).await.unwrap();
        let RoomHandle(second) = registry.send(args("2", "wss://example.test")).await.unwrap();
        assert_ne!(first, second);
    }

    #[actix_rt::test]
    async fn swap_if_url_changed_replaces_the_room_under_a_new_url() {
        let registry = RoomRegistry::new(Duration::from_secs(30), Duration::from_secs(10)).start();
        let RoomHandle(first) = registry.send(args("1", "wss://a.test")).await.unwrap();

        registry
            .send(SwapIfUrlChanged {
                league_id: "1".to_string(),
                upstream_url: "wss://b.test".to_string(),
            })
            .await
            .unwrap();

        let RoomHandle(second) = registry.send(args("1", "wss://b.test")).await.unwrap();
        assert_ne!(first, second);
    }

    #[actix_rt::test]
    async fn swap_if_url_changed_is_a_no_op_when_url_is_unchanged() {
        let registry = RoomRegistry::new(Duration::from_secs(30), Duration::from_secs(10)).start();
        let RoomHandle(first) = registry.send(args("1", "wss://a.test")).await.unwrap();

        registry
            .send(SwapIfUrlChanged {
                league_id: "1".to_string(),
                upstream_url: "wss://a.test".to_string(),
            })
            .await
            .unwrap();

        let RoomHandle(second) = registry.send(args("1", "wss://a.test")).await.unwrap();
        assert_eq!(first, second);
    }
}
