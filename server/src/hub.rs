//! Central dispatcher owning session membership and broadcast fan-out
//!
//! All membership changes and broadcasts pass through three queues drained by
//! a single loop ([`Hub::run`]). That loop is the only writer of the session
//! registry, so registrations, unregistrations and broadcasts are totally
//! ordered. Fan-out never blocks: every delivery ends in a non-blocking push
//! onto the target session's mailbox.

use crate::auth::CredentialStore;
use crate::config::ServerConfig;
use crate::game::World;
use crate::registry::SharedRegistry;
use crate::session::Session;
use log::{debug, error, info};
use parking_lot::Mutex;
use shared::{Msg, Packet};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

struct HubQueues {
    register: mpsc::UnboundedReceiver<Arc<Session>>,
    unregister: mpsc::UnboundedReceiver<Arc<Session>>,
    broadcast: mpsc::UnboundedReceiver<Packet>,
}

pub struct Hub {
    config: ServerConfig,
    /// Connected sessions indexed by session id
    clients: SharedRegistry<Arc<Session>>,
    world: World,
    credentials: Arc<dyn CredentialStore>,

    register_tx: mpsc::UnboundedSender<Arc<Session>>,
    unregister_tx: mpsc::UnboundedSender<Arc<Session>>,
    broadcast_tx: mpsc::UnboundedSender<Packet>,
    /// Taken by the dispatch loop when it starts
    queues: Mutex<Option<HubQueues>>,
}

impl Hub {
    pub fn new(config: ServerConfig, credentials: Arc<dyn CredentialStore>) -> Arc<Self> {
        let (register_tx, register) = mpsc::unbounded_channel();
        let (unregister_tx, unregister) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast) = mpsc::unbounded_channel();

        Arc::new(Self {
            config,
            clients: SharedRegistry::new(),
            world: World::new(),
            credentials,
            register_tx,
            unregister_tx,
            broadcast_tx,
            queues: Mutex::new(Some(HubQueues {
                register,
                unregister,
                broadcast,
            })),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    /// Queues a new session for id assignment and initialization
    pub fn register(&self, session: Arc<Session>) {
        if self.register_tx.send(session).is_err() {
            error!("Failed to queue session registration: hub is gone");
        }
    }

    /// Queues a session for removal; removing an unknown session is a no-op
    pub fn unregister(&self, session: Arc<Session>) {
        if self.unregister_tx.send(session).is_err() {
            error!("Failed to queue session unregistration: hub is gone");
        }
    }

    /// Queues a packet for delivery to every session except its sender
    pub fn broadcast(&self, packet: Packet) {
        if self.broadcast_tx.send(packet).is_err() {
            error!("Failed to queue broadcast packet: hub is gone");
        }
    }

    /// Looks up a connected session by id
    pub fn session(&self, id: u64) -> Option<Arc<Session>> {
        self.clients.get(id)
    }

    /// Hands `msg` to the handler of session `peer_id`, attributed to
    /// `sender_id`. Returns false if no such session is connected.
    ///
    /// The handler runs on its own task, so this is safe to call from inside
    /// a state handler, including one belonging to the peer itself. Messages
    /// passed this way are not ordered relative to each other.
    pub fn pass_to_peer(&self, sender_id: u64, peer_id: u64, msg: Msg) -> bool {
        let Some(peer) = self.clients.get(peer_id) else {
            debug!("Dropping {} for unknown peer {}", msg.kind(), peer_id);
            return false;
        };

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { peer.process_message(sender_id, msg) });
                true
            }
            Err(e) => {
                error!("Cannot pass {} to peer {}: {}", msg.kind(), peer_id, e);
                false
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Seeds the world and runs the dispatch loop
    ///
    /// Only the first call does anything; the loop runs for as long as the
    /// hub is alive.
    pub async fn run(self: Arc<Self>) {
        let Some(mut queues) = self.queues.lock().take() else {
            error!("Hub dispatch loop is already running");
            return;
        };

        info!("Placing spores");
        self.world.seed_spores(self.config.spore_count);

        info!("Awaiting client registrations");

        loop {
            tokio::select! {
                Some(session) = queues.register.recv() => self.handle_register(session),
                Some(session) = queues.unregister.recv() => self.handle_unregister(&session),
                Some(packet) = queues.broadcast.recv() => self.handle_broadcast(packet),
                else => break,
            }
        }

        info!("Hub dispatch loop stopped");
    }

    fn handle_register(&self, session: Arc<Session>) {
        if session.is_closed() {
            debug!("Skipping registration of a session that already closed");
            return;
        }

        let id = self.clients.add(Arc::clone(&session));
        session.initialize(id);

        // the connection may have dropped while we were initializing it
        if session.is_closed() {
            self.clients.remove(id);
        }
    }

    fn handle_unregister(&self, session: &Session) {
        let id = session.id();
        if id != 0 && self.clients.remove(id).is_some() {
            info!("Client {} unregistered ({} connected)", id, self.clients.len());
        }
    }

    fn handle_broadcast(&self, packet: Packet) {
        let Packet { sender_id, msg } = packet;
        self.clients.for_each(|id, session| {
            if id != sender_id {
                session.process_message(sender_id, msg.clone());
            }
        });
    }
}
