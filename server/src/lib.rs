//! # Spore Arena Server
//!
//! Authoritative server for a real-time arena where players drift around a
//! square world, absorb spores and swallow smaller players. Clients speak a
//! binary websocket protocol defined in the `shared` crate.
//!
//! ## Core Responsibilities
//!
//! ### Session Fan-out
//! Every connection becomes a [`session::Session`] registered with the
//! [`hub::Hub`]. The hub assigns ids and broadcasts packets to every session
//! but the sender, so one client's actions reach all the others.
//!
//! ### Claim Validation
//! Clients announce what they consumed; the server decides whether the claim
//! holds. A spore or player is only absorbed if it still exists, is within
//! reach, and (for players) the claimant outweighs it by more than half
//! again its mass. Removal from the shared registry settles races between
//! competing claims.
//!
//! ### Accounts
//! Before joining the game a client registers and logs in against a
//! [`auth::CredentialStore`], kept in memory or in a JSON file.
//!
//! ## Architecture Design
//!
//! ### Single Dispatch Loop
//! Registrations, unregistrations and broadcasts go through three queues
//! drained by one hub task, which is the only writer of session membership.
//!
//! ### Non-blocking Delivery
//! Each session owns a bounded mailbox drained by its own write task. Sends
//! never wait: when a slow client's mailbox is full the message is dropped
//! and counted, so one stalled peer cannot hold up the others.
//!
//! ### State Machine per Session
//! A session is always in exactly one protocol state ([`states::Connected`]
//! or [`states::InGame`]); the active state handles every message the
//! session sees and decides when to move to the next one.
//!
//! ## Module Organization
//!
//! - `hub`: session registry, id assignment and broadcast fan-out
//! - `session`: per-connection mailbox, state holder and socket pumps
//! - `states`: the login and in-game protocol states
//! - `game`: players, spores and the shared world
//! - `physics`: mass, reach and motion arithmetic
//! - `registry`: the thread-safe id-keyed collection behind all of the above
//! - `auth`: account storage and password hashing
//! - `network`: TCP listener and websocket handshake
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 9000,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Seeds the world, then accepts websocket clients forever
//!     Server::bind(config).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod game;
pub mod hub;
pub mod network;
pub mod physics;
pub mod registry;
pub mod session;
pub mod states;
