//! Integration tests for the websocket server
//!
//! These tests run a real listener on an ephemeral port and talk to it the way
//! game clients do.

use futures_util::{SinkExt, StreamExt};
use server::config::ServerConfig;
use server::game::Spore;
use server::hub::Hub;
use server::network::Server;
use shared::{Msg, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(3);

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    id: u64,
}

impl TestClient {
    /// Connects and waits for the id announcement
    async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("Failed to connect");
        let mut client = Self { ws, id: 0 };

        let greeting = client.recv_matching(|p| matches!(p.msg, Msg::Id(_))).await;
        match greeting.msg {
            Msg::Id(id) => client.id = id.id,
            other => panic!("Unexpected greeting: {:?}", other),
        }
        client
    }

    async fn send(&mut self, msg: Msg) {
        let bytes = shared::encode(&Packet::new(0, msg)).unwrap();
        self.ws.send(Message::binary(bytes)).await.unwrap();
    }

    async fn recv(&mut self) -> Packet {
        timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Binary(bytes))) => return shared::decode(&bytes).unwrap(),
                    Some(Ok(_)) => continue,
                    other => panic!("Connection ended unexpectedly: {:?}", other),
                }
            }
        })
        .await
        .expect("Timed out waiting for a packet")
    }

    async fn recv_matching<F>(&mut self, mut wanted: F) -> Packet
    where
        F: FnMut(&Packet) -> bool,
    {
        loop {
            let packet = self.recv().await;
            if wanted(&packet) {
                return packet;
            }
        }
    }

    /// Registers and logs in, returning the login reply
    async fn sign_in(&mut self, username: &str, password: &str) -> Msg {
        self.send(Msg::register(username, password)).await;
        assert_eq!(self.recv().await.msg, Msg::ok());
        self.send(Msg::login(username, password)).await;
        self.recv().await.msg
    }
}

/// Starts a server on an ephemeral port and returns its URL and hub
async fn start_server(config: ServerConfig) -> (String, Arc<Hub>) {
    let config = ServerConfig {
        port: 0,
        spore_count: 0,
        // cheapest bcrypt work factor
        password_cost: 4,
        ..config
    };
    let server = Server::bind(config).await.expect("Failed to bind server");
    let url = format!("ws://{}", server.local_addr().unwrap());
    let hub = Arc::clone(server.hub());
    tokio::spawn(server.run());
    (url, hub)
}

/// LOGIN PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests the full register then login exchange
    #[tokio::test]
    async fn register_then_login() {
        let (url, _hub) = start_server(ServerConfig::default()).await;
        let mut client = TestClient::connect(&url).await;
        assert_eq!(client.id, 1);

        client.send(Msg::register("alice", "pw1")).await;
        assert_eq!(client.recv().await.msg, Msg::ok());

        client.send(Msg::login("alice", "wrongpw")).await;
        assert_eq!(client.recv().await.msg, Msg::deny("Incorrect username or password"));

        client.send(Msg::login("alice", "pw1")).await;
        assert_eq!(client.recv().await.msg, Msg::ok());
    }

    /// Tests that accounts are shared across connections
    #[tokio::test]
    async fn duplicate_registration_from_second_client() {
        let (url, _hub) = start_server(ServerConfig::default()).await;
        let mut first = TestClient::connect(&url).await;
        let mut second = TestClient::connect(&url).await;
        assert_ne!(first.id, second.id);

        first.send(Msg::register("bob", "pw")).await;
        assert_eq!(first.recv().await.msg, Msg::ok());

        second.send(Msg::register("BOB", "pw")).await;
        assert_eq!(second.recv().await.msg, Msg::deny("User already exists"));
    }

    /// Tests that malformed frames do not end the connection
    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (url, _hub) = start_server(ServerConfig::default()).await;
        let mut client = TestClient::connect(&url).await;

        client.ws.send(Message::binary(vec![0xde, 0xad, 0xbe, 0xef])).await.unwrap();
        client.ws.send(Message::text("not a packet")).await.unwrap();

        client.send(Msg::register("carol", "pw")).await;
        assert_eq!(client.recv().await.msg, Msg::ok());
    }

    /// Tests that a disconnect removes the session from the hub
    #[tokio::test]
    async fn disconnect_unregisters_session() {
        let (url, hub) = start_server(ServerConfig::default()).await;
        let mut client = TestClient::connect(&url).await;
        let _other = TestClient::connect(&url).await;
        assert_eq!(hub.client_count(), 2);

        client.ws.close(None).await.unwrap();

        timeout(WAIT, async {
            while hub.client_count() != 1 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Session was never unregistered");
        assert!(hub.session(client.id).is_none());
    }
}

/// GAMEPLAY INTEGRATION TESTS
mod game_tests {
    use super::*;

    fn join_on_login() -> ServerConfig {
        ServerConfig {
            join_on_login: true,
            ..ServerConfig::default()
        }
    }

    async fn join(url: &str, name: &str) -> TestClient {
        let mut client = TestClient::connect(url).await;
        assert_eq!(client.sign_in(name, "pw").await, Msg::ok());

        let id = client.id;
        let own = client
            .recv_matching(|p| matches!(&p.msg, Msg::Player(player) if player.id == id))
            .await;
        assert_eq!(own.sender_id, id);
        client
    }

    /// Tests that a validated spore consumption reaches the other players
    #[tokio::test]
    async fn spore_consumption_fans_out() {
        let (url, hub) = start_server(join_on_login()).await;
        let mut a = join(&url, "alice").await;
        let mut b = join(&url, "bob").await;

        {
            let player = hub.world().players.get(a.id).unwrap();
            let mut player = player.lock();
            player.x = 300.0;
            player.y = 300.0;
        }
        let spore_id = hub.world().spores.add(Spore {
            x: 310.0,
            y: 300.0,
            radius: 5.0,
        });

        a.send(Msg::spore_consumed(spore_id)).await;

        let relayed = b
            .recv_matching(|p| matches!(p.msg, Msg::SporeConsumed(_)))
            .await;
        assert_eq!(relayed.sender_id, a.id);
        assert_eq!(relayed.msg, Msg::spore_consumed(spore_id));
        assert!(!hub.world().spores.contains(spore_id));
    }

    /// Tests that chat goes to everyone except the author
    #[tokio::test]
    async fn chat_is_broadcast_to_others() {
        let (url, _hub) = start_server(join_on_login()).await;
        let mut a = join(&url, "alice").await;
        let mut b = join(&url, "bob").await;

        a.send(Msg::chat("hello arena")).await;

        let heard = b.recv_matching(|p| matches!(p.msg, Msg::Chat(_))).await;
        assert_eq!(heard.sender_id, a.id);
        assert_eq!(heard.msg, Msg::chat("hello arena"));

        // the first chat a sees must be the reply, not its own message
        b.send(Msg::chat("hi")).await;
        let reply = a.recv_matching(|p| matches!(p.msg, Msg::Chat(_))).await;
        assert_eq!(reply.msg, Msg::chat("hi"));
    }

    /// Tests that movement updates are published to other clients
    #[tokio::test]
    async fn direction_change_moves_player() {
        let (url, _hub) = start_server(join_on_login()).await;
        let mut a = join(&url, "alice").await;
        let mut b = join(&url, "bob").await;

        a.send(Msg::direction(std::f64::consts::FRAC_PI_2)).await;

        let a_id = a.id;
        let first = b
            .recv_matching(|p| p.sender_id == a_id && matches!(p.msg, Msg::Player(_)))
            .await;
        let second = b
            .recv_matching(|p| p.sender_id == a_id && matches!(p.msg, Msg::Player(_)))
            .await;

        match (first.msg, second.msg) {
            (Msg::Player(first), Msg::Player(second)) => {
                assert!(second.y > first.y);
                assert_eq!(second.direction, std::f64::consts::FRAC_PI_2);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
    }

    /// Tests that leaving the game removes the player from the world
    #[tokio::test]
    async fn disconnect_removes_player() {
        let (url, hub) = start_server(join_on_login()).await;
        let mut a = join(&url, "alice").await;
        assert!(hub.world().players.contains(a.id));

        a.ws.close(None).await.unwrap();

        timeout(WAIT, async {
            while hub.world().players.contains(a.id) {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Player was never removed");
    }
}
