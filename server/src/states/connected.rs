use super::{ClientState, InGame, Transition};
use crate::auth::{self, CredentialError};
use crate::session::Session;
use log::{debug, error, info, warn};
use shared::{LoginRequestMessage, Msg, RegisterRequestMessage};
use std::sync::Arc;

const LOGIN_FAILED: &str = "Incorrect username or password";
const USER_EXISTS: &str = "User already exists";
const REGISTER_FAILED: &str = "Error registering user (internal server error) - please try again later";

/// Pre-game state: the client may log in or register an account
#[derive(Default)]
pub struct Connected {
    session: Option<Arc<Session>>,
}

impl Connected {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_login(&self, session: &Arc<Session>, sender_id: u64, request: LoginRequestMessage) -> Transition {
        let id = session.id();
        if sender_id != id {
            warn!(
                "Client {} [Connected]: ignoring login request relayed from client {}",
                id, sender_id
            );
            return Transition::Stay;
        }

        let user = match session.hub().credentials().get_user_by_username(&request.username) {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(
                    "Client {} [Connected]: login attempt for unknown user {}",
                    id, request.username
                );
                session.send(Msg::deny(LOGIN_FAILED));
                return Transition::Stay;
            }
            Err(e) => {
                error!("Client {} [Connected]: error looking up user: {}", id, e);
                session.send(Msg::deny(LOGIN_FAILED));
                return Transition::Stay;
            }
        };

        if !auth::verify_password(&user.password_hash, &request.password) {
            warn!(
                "Client {} [Connected]: wrong password for user {}",
                id, user.username
            );
            session.send(Msg::deny(LOGIN_FAILED));
            return Transition::Stay;
        }

        info!("Client {} [Connected]: user {} logged in", id, user.username);
        session.send(Msg::ok());

        if session.hub().config().join_on_login {
            return Transition::Switch(Box::new(InGame::new(user.username)));
        }
        Transition::Stay
    }

    fn handle_register(&self, session: &Arc<Session>, sender_id: u64, request: RegisterRequestMessage) -> Transition {
        let id = session.id();
        if sender_id != id {
            warn!(
                "Client {} [Connected]: ignoring register request relayed from client {}",
                id, sender_id
            );
            return Transition::Stay;
        }

        if let Err(reason) = auth::validate_username(&request.username) {
            warn!(
                "Client {} [Connected]: rejected username {:?}: {}",
                id, request.username, reason
            );
            session.send(Msg::deny(format!("Invalid username: {}", reason)));
            return Transition::Stay;
        }

        let credentials = session.hub().credentials();
        let username = request.username.to_lowercase();

        match credentials.get_user_by_username(&username) {
            Ok(Some(_)) => {
                warn!("Client {} [Connected]: user {} already exists", id, username);
                session.send(Msg::deny(USER_EXISTS));
                return Transition::Stay;
            }
            Ok(None) => {}
            Err(e) => {
                error!("Client {} [Connected]: error looking up user: {}", id, e);
                session.send(Msg::deny(REGISTER_FAILED));
                return Transition::Stay;
            }
        }

        let cost = session.hub().config().password_cost;
        let created = auth::hash_password(&request.password, cost)
            .and_then(|password_hash| credentials.create_user(&username, &password_hash));
        match created {
            Ok(record) => {
                info!(
                    "Client {} [Connected]: registered user {} (account {})",
                    id, record.username, record.id
                );
                session.send(Msg::ok());
            }
            Err(CredentialError::AlreadyExists(_)) => {
                warn!("Client {} [Connected]: user {} already exists", id, username);
                session.send(Msg::deny(USER_EXISTS));
            }
            Err(e) => {
                error!("Client {} [Connected]: failed to register user: {}", id, e);
                session.send(Msg::deny(REGISTER_FAILED));
            }
        }

        Transition::Stay
    }
}

impl ClientState for Connected {
    fn name(&self) -> &'static str {
        "Connected"
    }

    fn bind(&mut self, session: Arc<Session>) {
        self.session = Some(session);
    }

    fn on_enter(&mut self) {
        if let Some(session) = &self.session {
            session.send(Msg::id(session.id()));
        }
    }

    fn handle_message(&mut self, sender_id: u64, msg: Msg) -> Transition {
        let Some(session) = self.session.clone() else {
            return Transition::Stay;
        };

        match msg {
            Msg::LoginRequest(request) => self.handle_login(&session, sender_id, request),
            Msg::RegisterRequest(request) => self.handle_register(&session, sender_id, request),
            other => {
                debug!(
                    "Client {} [Connected]: ignoring {} message from {}",
                    session.id(),
                    other.kind(),
                    sender_id
                );
                Transition::Stay
            }
        }
    }

    fn on_exit(&mut self) {}
}
