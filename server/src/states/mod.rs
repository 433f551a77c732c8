//! Per-session protocol states
//!
//! A session holds exactly one active state. Every inbound or relayed message
//! goes to the active state's handler, which may ask the session to switch to
//! a new state by returning [`Transition::Switch`].

mod connected;
mod in_game;

pub use connected::Connected;
pub use in_game::InGame;

use crate::session::Session;
use shared::Msg;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

pub trait ClientState: Send {
    fn name(&self) -> &'static str;

    /// Attaches the owning session. Called once, before [`ClientState::on_enter`].
    fn bind(&mut self, session: Arc<Session>);

    fn on_enter(&mut self);

    /// Handles a message originating from `sender_id`, which is the owning
    /// session's own id when the message came from its own client
    fn handle_message(&mut self, sender_id: u64, msg: Msg) -> Transition;

    fn on_exit(&mut self);
}

pub enum Transition {
    Stay,
    Switch(Box<dyn ClientState>),
}

/// A background task that stops when cancelled or when the handle is dropped
pub struct TaskHandle {
    cancel: Option<oneshot::Sender<()>>,
    join: tokio::task::JoinHandle<()>,
}

impl TaskHandle {
    /// Spawns `task`, handing it the receiver that resolves on cancellation
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancelled) = oneshot::channel();
        let join = tokio::spawn(task(cancelled));
        Self {
            cancel: Some(cancel),
            join,
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
