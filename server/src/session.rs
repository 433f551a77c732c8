//! One connected client: its mailbox, its protocol state and the two pumps
//! moving frames between the websocket and the hub
//!
//! The read pump decodes inbound frames and hands them to the active state.
//! The write pump drains the bounded mailbox onto the socket. Anything that
//! wants to reach the client goes through [`Session::send`], which never
//! blocks; a full mailbox drops the message instead.

use crate::hub::Hub;
use crate::states::{ClientState, Connected, Transition};
use futures_util::sink::Sink;
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::{Msg, Packet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

pub struct Session {
    /// 0 until the hub assigns an id
    id: watch::Sender<u64>,
    addr: Option<SocketAddr>,
    hub: Arc<Hub>,

    mailbox: Mutex<Option<mpsc::Sender<Packet>>>,
    outbound: Mutex<Option<mpsc::Receiver<Packet>>>,
    state: Mutex<Option<Box<dyn ClientState>>>,

    closed: watch::Sender<bool>,
    dropped: AtomicU64,
}

impl Session {
    pub fn new(hub: Arc<Hub>, addr: Option<SocketAddr>) -> Arc<Self> {
        let capacity = hub.config().mailbox_capacity.max(1);
        let (mailbox, outbound) = mpsc::channel(capacity);

        Arc::new(Self {
            id: watch::Sender::new(0),
            addr,
            hub,
            mailbox: Mutex::new(Some(mailbox)),
            outbound: Mutex::new(Some(outbound)),
            state: Mutex::new(None),
            closed: watch::Sender::new(false),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        *self.id.borrow()
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Resolves with the session id once the hub has assigned one
    pub async fn registered(&self) -> u64 {
        let mut id = self.id.subscribe();
        let assigned = match id.wait_for(|id| *id != 0).await {
            Ok(id) => *id,
            Err(_) => 0,
        };
        assigned
    }

    /// Takes the receiving end of the mailbox. The write pump does this when
    /// the socket is served; it is only available once.
    pub fn take_outbound(&self) -> Option<mpsc::Receiver<Packet>> {
        self.outbound.lock().take()
    }

    /// Called by the hub with the freshly assigned id
    ///
    /// The id is published while the state lock is held, so no inbound
    /// message can be dispatched before the first state is in place.
    pub fn initialize(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        self.id.send_replace(id);
        info!("Client {}: registered", id);
        self.transition(&mut state, Some(Box::new(Connected::new())));

        // lost a race with close(); make sure the new state is torn down again
        if self.is_closed() {
            self.transition(&mut state, None);
        }
    }

    /// Replaces the active state, running exit then enter hooks
    pub fn set_state(self: &Arc<Self>, next: Option<Box<dyn ClientState>>) {
        let mut state = self.state.lock();
        self.transition(&mut state, next);
    }

    fn transition(self: &Arc<Self>, slot: &mut Option<Box<dyn ClientState>>, next: Option<Box<dyn ClientState>>) {
        let previous = slot.take();
        let previous_name = previous.as_ref().map_or("None", |state| state.name());
        let next_name = next.as_ref().map_or("None", |state| state.name());

        info!(
            "Client {}: switching from state {} to {}",
            self.id(),
            previous_name,
            next_name
        );

        if let Some(mut previous) = previous {
            previous.on_exit();
        }

        if let Some(mut next) = next {
            next.bind(Arc::clone(self));
            next.on_enter();
            *slot = Some(next);
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state.lock().as_ref().map_or("None", |state| state.name())
    }

    /// Dispatches a message to the active state and applies any transition
    /// it asks for
    pub fn process_message(self: &Arc<Self>, sender_id: u64, msg: Msg) {
        let mut state = self.state.lock();
        let transition = match state.as_mut() {
            Some(current) => current.handle_message(sender_id, msg),
            None => {
                debug!(
                    "Client {}: no active state, dropping {} from {}",
                    self.id(),
                    msg.kind(),
                    sender_id
                );
                return;
            }
        };

        if let Transition::Switch(next) = transition {
            self.transition(&mut state, Some(next));
        }
    }

    /// Queues a message for this client, attributed to this session
    pub fn send(&self, msg: Msg) {
        self.send_as(msg, self.id());
    }

    /// Queues a message for this client, attributed to `sender_id`
    pub fn send_as(&self, msg: Msg, sender_id: u64) {
        let Some(mailbox) = self.mailbox.lock().clone() else {
            debug!("Client {}: mailbox closed, dropping {}", self.id(), msg.kind());
            return;
        };

        match mailbox.try_send(Packet::new(sender_id, msg)) {
            Ok(()) => {}
            Err(TrySendError::Full(packet)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Client {}: send channel full, dropping {} message",
                    self.id(),
                    packet.msg.kind()
                );
            }
            Err(TrySendError::Closed(packet)) => {
                debug!(
                    "Client {}: mailbox closed, dropping {}",
                    self.id(),
                    packet.msg.kind()
                );
            }
        }
    }

    /// Messages discarded because the mailbox was full
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Sends a message to every other session through the hub
    pub fn broadcast(&self, msg: Msg) {
        self.hub.broadcast(Packet::new(self.id(), msg));
    }

    /// Hands a message directly to one other session's handler
    pub fn pass_to_peer(&self, msg: Msg, peer_id: u64) -> bool {
        self.hub.pass_to_peer(self.id(), peer_id, msg)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Tears the session down. Only the first call has any effect.
    pub fn close(self: &Arc<Self>, reason: &str) {
        if self.closed.send_replace(true) {
            return;
        }

        info!("Client {}: closing connection: {}", self.id(), reason);
        self.set_state(None);
        self.hub.unregister(Arc::clone(self));
        // the write pump exits once the mailbox is drained
        self.mailbox.lock().take();
    }

    /// Runs both pumps over `socket` until either side stops
    pub async fn serve<S>(self: Arc<Self>, socket: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Some(outbound) = self.take_outbound() else {
            error!("Client {}: outbound queue already taken", self.id());
            self.close("outbound queue unavailable");
            return;
        };

        let (sink, stream) = socket.split();
        let writer = tokio::spawn(Arc::clone(&self).write_pump(sink, outbound));

        Arc::clone(&self).read_pump(stream).await;

        if let Err(e) = writer.await {
            error!("Client {}: write pump panicked: {}", self.id(), e);
        }
    }

    async fn read_pump<St>(self: Arc<Self>, mut stream: St)
    where
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let mut closed = self.closed.subscribe();

        tokio::select! {
            _ = self.registered() => {}
            _ = wait_closed(&mut closed) => return,
        }

        loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = wait_closed(&mut closed) => break,
            };

            match frame {
                Some(Ok(Message::Binary(bytes))) => self.handle_frame(&bytes),
                Some(Ok(Message::Text(_))) => {
                    warn!("Client {}: ignoring text frame", self.id());
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Client {}: connection closed by peer", self.id());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if is_expected_close(&e) {
                        debug!("Client {}: connection dropped: {}", self.id(), e);
                    } else {
                        error!("Client {}: websocket error: {}", self.id(), e);
                    }
                    break;
                }
            }
        }

        self.close("read pump stopped");
    }

    fn handle_frame(self: &Arc<Self>, bytes: &[u8]) {
        match shared::decode(bytes) {
            Ok(mut packet) => {
                if packet.sender_id == 0 {
                    packet.sender_id = self.id();
                }
                self.process_message(packet.sender_id, packet.msg);
            }
            Err(e) => warn!("Client {}: error decoding frame: {}", self.id(), e),
        }
    }

    async fn write_pump<Si>(self: Arc<Self>, mut sink: Si, mut outbound: mpsc::Receiver<Packet>)
    where
        Si: Sink<Message, Error = WsError> + Unpin,
    {
        let mut closed = self.closed.subscribe();

        loop {
            let packet = tokio::select! {
                biased;
                packet = outbound.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
                _ = wait_closed(&mut closed) => break,
            };

            let bytes = match shared::encode(&packet) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(
                        "Client {}: error encoding {} message: {}",
                        self.id(),
                        packet.msg.kind(),
                        e
                    );
                    break;
                }
            };

            if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                if is_expected_close(&e) {
                    debug!("Client {}: connection dropped while writing: {}", self.id(), e);
                } else {
                    error!("Client {}: error writing to websocket: {}", self.id(), e);
                }
                break;
            }
        }

        let _ = sink.close().await;
        self.close("write pump stopped");
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Disconnects that are a normal part of a client going away
fn is_expected_close(error: &WsError) -> bool {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}
