use super::{ClientState, TaskHandle, Transition};
use crate::game::{Player, SharedPlayer};
use crate::physics;
use crate::session::Session;
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::{
    ChatMessage, Msg, PlayerConsumedMessage, PlayerDirectionMessage, PlayerMessage, SporeConsumedMessage,
    SporeMessage, CONSUME_BUFFER, MOTION_TICK_MS, PLAYER_SPEED, PLAYER_START_RADIUS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Active gameplay: the session owns a player in the shared world
pub struct InGame {
    session: Option<Arc<Session>>,
    player: SharedPlayer,
    motion: Option<TaskHandle>,
    spore_stream: Option<TaskHandle>,
}

impl InGame {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            session: None,
            player: Arc::new(Mutex::new(Player::new(name))),
            motion: None,
            spore_stream: None,
        }
    }

    pub fn player(&self) -> &SharedPlayer {
        &self.player
    }

    fn handle_player(&self, session: &Session, sender_id: u64, state: PlayerMessage) {
        if sender_id == session.id() {
            debug!(
                "Client {} [InGame]: ignoring player update from our own client",
                sender_id
            );
            return;
        }
        session.send_as(Msg::Player(state), sender_id);
    }

    fn handle_direction(&mut self, session: &Arc<Session>, sender_id: u64, heading: PlayerDirectionMessage) {
        if sender_id != session.id() {
            debug!(
                "Client {} [InGame]: ignoring direction change relayed from {}",
                session.id(),
                sender_id
            );
            return;
        }

        self.player.lock().direction = heading.direction;
        if self.motion.is_none() {
            self.motion = Some(start_motion(Arc::clone(session), Arc::clone(&self.player)));
        }
    }

    fn handle_chat(&self, session: &Session, sender_id: u64, chat: ChatMessage) {
        if sender_id == session.id() {
            session.broadcast(Msg::Chat(chat));
        } else {
            session.send_as(Msg::Chat(chat), sender_id);
        }
    }

    fn handle_spore_consumed(&self, session: &Session, sender_id: u64, claim: SporeConsumedMessage) {
        if sender_id != session.id() {
            session.send_as(Msg::SporeConsumed(claim), sender_id);
            return;
        }

        let id = session.id();
        let spores = &session.hub().world().spores;

        let Some(spore) = spores.get(claim.spore_id) else {
            warn!(
                "Client {} [InGame]: could not verify spore consumption: spore {} does not exist",
                id, claim.spore_id
            );
            return;
        };

        if let Err(reason) = self.check_reach(spore.x, spore.y, spore.radius) {
            warn!(
                "Client {} [InGame]: could not verify spore consumption: {}",
                id, reason
            );
            return;
        }

        // whoever removes the spore first owns the consumption
        if spores.remove(claim.spore_id).is_none() {
            warn!(
                "Client {} [InGame]: spore {} was consumed by someone else first",
                id, claim.spore_id
            );
            return;
        }

        self.grow(physics::mass(spore.radius));
        info!("Client {} [InGame]: consumed spore {}", id, claim.spore_id);
        session.broadcast(Msg::SporeConsumed(claim));
    }

    fn handle_player_consumed(&self, session: &Session, sender_id: u64, claim: PlayerConsumedMessage) -> Transition {
        let id = session.id();

        if sender_id != id {
            session.send_as(Msg::PlayerConsumed(claim), sender_id);
            if claim.player_id == id {
                info!(
                    "Client {} [InGame]: consumed by client {}, respawning",
                    id, sender_id
                );
                let name = self.player.lock().name.clone();
                return Transition::Switch(Box::new(InGame::new(name)));
            }
            return Transition::Stay;
        }

        if claim.player_id == id {
            warn!("Client {} [InGame]: a player cannot consume itself", id);
            return Transition::Stay;
        }

        let players = &session.hub().world().players;
        let Some(victim) = players.get(claim.player_id) else {
            warn!(
                "Client {} [InGame]: could not verify player consumption: player {} does not exist",
                id, claim.player_id
            );
            return Transition::Stay;
        };
        // copy so that no two player locks are ever held together
        let victim = victim.lock().clone();

        let our_radius = self.player.lock().radius;
        if !physics::outweighs(our_radius, victim.radius) {
            warn!(
                "Client {} [InGame]: could not verify player consumption: not massive enough (radius {:.2} vs {:.2})",
                id, our_radius, victim.radius
            );
            return Transition::Stay;
        }

        if let Err(reason) = self.check_reach(victim.x, victim.y, victim.radius) {
            warn!(
                "Client {} [InGame]: could not verify player consumption: {}",
                id, reason
            );
            return Transition::Stay;
        }

        if players.remove(claim.player_id).is_none() {
            warn!(
                "Client {} [InGame]: player {} was consumed by someone else first",
                id, claim.player_id
            );
            return Transition::Stay;
        }

        self.grow(victim.mass());
        info!("Client {} [InGame]: consumed player {}", id, claim.player_id);
        session.broadcast(Msg::PlayerConsumed(claim));
        Transition::Stay
    }

    fn relay_spore(&self, session: &Session, sender_id: u64, spore: SporeMessage) {
        session.send_as(Msg::Spore(spore), sender_id);
    }

    fn check_reach(&self, x: f64, y: f64, radius: f64) -> Result<(), String> {
        let player = self.player.lock();
        if physics::within_reach(player.x, player.y, player.radius, x, y, radius, CONSUME_BUFFER) {
            return Ok(());
        }
        Err(format!(
            "player is too far from the object (distSq: {:.2}, thresholdSq: {:.2})",
            physics::distance_sq(player.x, player.y, x, y),
            physics::reach_sq(player.radius, radius, CONSUME_BUFFER)
        ))
    }

    fn grow(&self, gained_mass: f64) {
        let mut player = self.player.lock();
        player.radius = physics::grown_radius(player.radius, gained_mass);
    }
}

impl ClientState for InGame {
    fn name(&self) -> &'static str {
        "InGame"
    }

    fn bind(&mut self, session: Arc<Session>) {
        self.session = Some(session);
    }

    fn on_enter(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let id = session.id();
        let world = session.hub().world();

        let (x, y) = world.spawn_position(PLAYER_START_RADIUS);
        let announcement = {
            let mut player = self.player.lock();
            player.x = x;
            player.y = y;
            player.radius = PLAYER_START_RADIUS;
            player.speed = PLAYER_SPEED;
            info!(
                "Client {} [InGame]: adding player {} to the shared collection",
                id, player.name
            );
            player.to_message(id)
        };

        world.players.add_with_id(Arc::clone(&self.player), id);
        session.send(announcement);

        let delay = session.hub().config().spore_stream_delay;
        self.spore_stream = Some(stream_spores(session, delay));
    }

    fn handle_message(&mut self, sender_id: u64, msg: Msg) -> Transition {
        let Some(session) = self.session.clone() else {
            return Transition::Stay;
        };

        match msg {
            Msg::Player(state) => self.handle_player(&session, sender_id, state),
            Msg::PlayerDirection(heading) => self.handle_direction(&session, sender_id, heading),
            Msg::Chat(chat) => self.handle_chat(&session, sender_id, chat),
            Msg::SporeConsumed(claim) => self.handle_spore_consumed(&session, sender_id, claim),
            Msg::PlayerConsumed(claim) => return self.handle_player_consumed(&session, sender_id, claim),
            Msg::Spore(spore) => self.relay_spore(&session, sender_id, spore),
            other => debug!(
                "Client {} [InGame]: ignoring {} message from {}",
                session.id(),
                other.kind(),
                sender_id
            ),
        }

        Transition::Stay
    }

    fn on_exit(&mut self) {
        if let Some(mut motion) = self.motion.take() {
            motion.cancel();
        }
        if let Some(mut stream) = self.spore_stream.take() {
            stream.cancel();
        }

        if let Some(session) = &self.session {
            let id = session.id();
            if session.hub().world().players.remove(id).is_some() {
                info!("Client {} [InGame]: removed player from the shared collection", id);
            }
        }
    }
}

/// Sends every spore that exists right now to the session, one at a time
fn stream_spores(session: Arc<Session>, delay: Duration) -> TaskHandle {
    TaskHandle::spawn(move |mut cancelled| async move {
        let spores = session.hub().world().spores.snapshot();
        debug!(
            "Client {} [InGame]: streaming {} spores",
            session.id(),
            spores.len()
        );

        for (id, spore) in spores {
            tokio::select! {
                biased;
                _ = &mut cancelled => return,
                _ = sleep(delay) => {}
            }
            session.send(spore.to_message(id));
        }
    })
}

/// Integrates the player's position every motion tick and publishes it
fn start_motion(session: Arc<Session>, player: SharedPlayer) -> TaskHandle {
    TaskHandle::spawn(move |mut cancelled| async move {
        let tick = Duration::from_millis(MOTION_TICK_MS);
        let delta = tick.as_secs_f64();

        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => break,
                _ = ticker.tick() => {
                    let update = {
                        let mut player = player.lock();
                        let (x, y) = physics::integrate(player.x, player.y, player.speed, player.direction, delta);
                        player.x = x;
                        player.y = y;
                        player.to_message(session.id())
                    };
                    session.broadcast(update.clone());
                    session.send(update);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::config::ServerConfig;
    use crate::game::Spore;
    use crate::hub::Hub;
    use assert_approx_eq::assert_approx_eq;
    use shared::Packet;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn test_hub() -> Arc<Hub> {
        let config = ServerConfig {
            spore_count: 0,
            spore_stream_delay: Duration::from_millis(1),
            ..ServerConfig::default()
        };
        Hub::new(config, Arc::new(MemoryCredentialStore::new()))
    }

    /// Registers a session through the hub and moves it into the game
    async fn join(hub: &Arc<Hub>, name: &str) -> (Arc<Session>, mpsc::Receiver<Packet>) {
        let session = Session::new(Arc::clone(hub), None);
        let mut outbound = session.take_outbound().unwrap();
        hub.register(Arc::clone(&session));
        timeout(Duration::from_secs(1), session.registered())
            .await
            .unwrap();
        session.set_state(Some(Box::new(InGame::new(name))));

        // identity, then our own player
        assert!(matches!(outbound.recv().await.unwrap().msg, Msg::Id(_)));
        assert!(matches!(outbound.recv().await.unwrap().msg, Msg::Player(_)));
        (session, outbound)
    }

    fn place(hub: &Hub, id: u64, x: f64, y: f64, radius: f64) {
        let player = hub.world().players.get(id).unwrap();
        let mut player = player.lock();
        player.x = x;
        player.y = y;
        player.radius = radius;
    }

    async fn expect_msg<F>(outbound: &mut mpsc::Receiver<Packet>, mut wanted: F) -> Packet
    where
        F: FnMut(&Packet) -> bool,
    {
        timeout(Duration::from_secs(1), async {
            loop {
                let packet = outbound.recv().await.unwrap();
                if wanted(&packet) {
                    return packet;
                }
            }
        })
        .await
        .expect("expected message never arrived")
    }

    #[tokio::test]
    async fn test_enter_registers_player_under_session_id() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (session, _outbound) = join(&hub, "alice").await;
        let player = hub.world().players.get(session.id()).unwrap();
        assert_eq!(player.lock().name, "alice");
        assert_eq!(player.lock().radius, PLAYER_START_RADIUS);
    }

    #[tokio::test]
    async fn test_enter_streams_existing_spores() {
        let hub = test_hub();
        hub.world().spores.add(Spore { x: 1.0, y: 2.0, radius: 5.0 });
        hub.world().spores.add(Spore { x: 3.0, y: 4.0, radius: 6.0 });
        tokio::spawn(Arc::clone(&hub).run());

        let (_session, mut outbound) = join(&hub, "alice").await;

        let first = expect_msg(&mut outbound, |p| matches!(p.msg, Msg::Spore(_))).await;
        let second = expect_msg(&mut outbound, |p| matches!(p.msg, Msg::Spore(_))).await;
        assert_eq!(first.msg, Msg::spore(1, 1.0, 2.0, 5.0));
        assert_eq!(second.msg, Msg::spore(2, 3.0, 4.0, 6.0));
    }

    #[tokio::test]
    async fn test_spore_consumption_is_validated_and_fanned_out() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, _a_rx) = join(&hub, "a").await;
        let (_b, mut b_rx) = join(&hub, "b").await;

        place(&hub, a.id(), 100.0, 100.0, 20.0);
        let spore_id = hub.world().spores.add(Spore { x: 110.0, y: 100.0, radius: 5.0 });

        a.process_message(a.id(), Msg::spore_consumed(spore_id));

        assert!(!hub.world().spores.contains(spore_id));
        let grown = hub.world().players.get(a.id()).unwrap().lock().radius;
        assert_approx_eq!(grown, physics::radius(physics::mass(20.0) + physics::mass(5.0)), 1e-9);

        let relayed = expect_msg(&mut b_rx, |p| matches!(p.msg, Msg::SporeConsumed(_))).await;
        assert_eq!(relayed.sender_id, a.id());
        assert_eq!(relayed.msg, Msg::spore_consumed(spore_id));
    }

    #[tokio::test]
    async fn test_distant_spore_is_not_consumed() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, _a_rx) = join(&hub, "a").await;
        place(&hub, a.id(), 100.0, 100.0, 20.0);
        let spore_id = hub.world().spores.add(Spore { x: 500.0, y: 500.0, radius: 5.0 });

        a.process_message(a.id(), Msg::spore_consumed(spore_id));

        assert!(hub.world().spores.contains(spore_id));
        assert_eq!(hub.world().players.get(a.id()).unwrap().lock().radius, 20.0);
    }

    #[tokio::test]
    async fn test_missing_spore_is_rejected() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, _a_rx) = join(&hub, "a").await;
        a.process_message(a.id(), Msg::spore_consumed(404));

        assert_eq!(hub.world().players.get(a.id()).unwrap().lock().radius, PLAYER_START_RADIUS);
    }

    #[tokio::test]
    async fn test_insufficient_mass_blocks_player_consumption() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, _a_rx) = join(&hub, "a").await;
        let (b, _b_rx) = join(&hub, "b").await;
        place(&hub, a.id(), 200.0, 200.0, 30.0);
        place(&hub, b.id(), 205.0, 200.0, 25.0);

        a.process_message(a.id(), Msg::player_consumed(b.id()));

        assert!(hub.world().players.contains(b.id()));
        assert_eq!(hub.world().players.get(a.id()).unwrap().lock().radius, 30.0);
    }

    #[tokio::test]
    async fn test_consumed_player_respawns() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, _a_rx) = join(&hub, "a").await;
        let (b, mut b_rx) = join(&hub, "b").await;
        place(&hub, a.id(), 200.0, 200.0, 40.0);
        place(&hub, b.id(), 210.0, 200.0, 25.0);

        a.process_message(a.id(), Msg::player_consumed(b.id()));

        let expected_radius = physics::radius(physics::mass(40.0) + physics::mass(25.0));
        let grown = hub.world().players.get(a.id()).unwrap().lock().radius;
        assert_approx_eq!(grown, expected_radius, 1e-9);

        // b hears about it, then comes back as a fresh player
        let relayed = expect_msg(&mut b_rx, |p| matches!(p.msg, Msg::PlayerConsumed(_))).await;
        assert_eq!(relayed.sender_id, a.id());
        let respawn = expect_msg(&mut b_rx, |p| matches!(p.msg, Msg::Player(_))).await;
        match respawn.msg {
            Msg::Player(player) => {
                assert_eq!(player.id, b.id());
                assert_eq!(player.name, "b");
                assert_eq!(player.radius, PLAYER_START_RADIUS);
            }
            other => panic!("Unexpected message: {:?}", other),
        }

        assert_eq!(b.state_name(), "InGame");
        let respawned = hub.world().players.get(b.id()).unwrap();
        assert_eq!(respawned.lock().radius, PLAYER_START_RADIUS);
    }

    #[tokio::test]
    async fn test_player_cannot_consume_itself() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, _a_rx) = join(&hub, "a").await;
        a.process_message(a.id(), Msg::player_consumed(a.id()));

        assert!(hub.world().players.contains(a.id()));
        assert_eq!(a.state_name(), "InGame");
    }

    #[tokio::test]
    async fn test_direction_starts_motion() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, mut a_rx) = join(&hub, "a").await;
        let (_b, mut b_rx) = join(&hub, "b").await;
        place(&hub, a.id(), 500.0, 500.0, 20.0);

        a.process_message(a.id(), Msg::direction(0.0));

        let own = expect_msg(&mut a_rx, |p| matches!(p.msg, Msg::Player(_))).await;
        match own.msg {
            Msg::Player(player) => assert!(player.x > 500.0),
            other => panic!("Unexpected message: {:?}", other),
        }
        let seen_by_b = expect_msg(&mut b_rx, |p| p.sender_id == a.id() && matches!(p.msg, Msg::Player(_))).await;
        assert_eq!(seen_by_b.sender_id, a.id());
    }

    #[tokio::test]
    async fn test_repeated_direction_keeps_single_motion_task() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, mut a_rx) = join(&hub, "a").await;
        place(&hub, a.id(), 300.0, 500.0, 20.0);

        a.process_message(a.id(), Msg::direction(1.0));
        a.process_message(a.id(), Msg::direction(0.0));

        let id = a.id();
        let mut updates = Vec::new();
        for _ in 0..5 {
            let packet = expect_msg(&mut a_rx, |p| p.sender_id == id && matches!(p.msg, Msg::Player(_))).await;
            if let Msg::Player(player) = packet.msg {
                updates.push((std::time::Instant::now(), player));
            }
        }

        let step = PLAYER_SPEED * MOTION_TICK_MS as f64 / 1000.0;
        for pair in updates.windows(2) {
            let (_, before) = &pair[0];
            let (_, after) = &pair[1];
            assert_approx_eq!(after.x - before.x, step, 1e-6);
            assert_approx_eq!(after.y, 500.0, 1e-6);
            assert_eq!(after.direction, 0.0);
        }

        // one update per tick: five updates span four tick intervals
        let span = updates[4].0 - updates[0].0;
        assert!(span >= Duration::from_millis(150), "updates arrived too fast: {:?}", span);
        a.close("test over");
    }

    #[tokio::test]
    async fn test_own_player_state_is_not_echoed() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, mut a_rx) = join(&hub, "a").await;
        let own_state = hub.world().players.get(a.id()).unwrap().lock().to_message(a.id());

        a.process_message(a.id(), own_state.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(a_rx.try_recv().is_err());

        // the same state relayed from another client is delivered
        a.process_message(7, own_state.clone());
        let relayed = expect_msg(&mut a_rx, |p| matches!(p.msg, Msg::Player(_))).await;
        assert_eq!(relayed.sender_id, 7);
        assert_eq!(relayed.msg, own_state);
    }

    #[tokio::test]
    async fn test_motion_stops_on_exit() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, _a_rx) = join(&hub, "a").await;
        a.process_message(a.id(), Msg::direction(1.0));
        tokio::time::sleep(Duration::from_millis(120)).await;

        let player = hub.world().players.get(a.id()).unwrap();
        a.close("test");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frozen = {
            let p = player.lock();
            (p.x, p.y)
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        let later = {
            let p = player.lock();
            (p.x, p.y)
        };
        assert_eq!(later, frozen);
        assert!(!hub.world().players.contains(a.id()));
    }

    #[tokio::test]
    async fn test_relayed_messages_keep_original_sender() {
        let hub = test_hub();
        tokio::spawn(Arc::clone(&hub).run());

        let (a, mut a_rx) = join(&hub, "a").await;
        a.process_message(7, Msg::spore(3, 1.0, 1.0, 5.0));
        a.process_message(7, Msg::chat("hi"));

        let spore = expect_msg(&mut a_rx, |p| matches!(p.msg, Msg::Spore(_))).await;
        assert_eq!(spore.sender_id, 7);
        let chat = expect_msg(&mut a_rx, |p| matches!(p.msg, Msg::Chat(_))).await;
        assert_eq!(chat.sender_id, 7);
    }
}
