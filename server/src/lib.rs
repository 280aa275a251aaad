//! # Arena Session Server Library
//!
//! The authoritative side of a multiplayer arena match. One process hosts one
//! session: it admits participants into a lobby, starts the match once enough
//! of them are present for a full lobby countdown, keeps the canonical kill,
//! death and ping counters while the match runs, and ends it when a victory
//! condition holds or the match clock runs out.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! Every value observers render (phase, roster, both countdowns, statistics,
//! avatar health and posture) is a [`shared::Replicated`] owned here. Only
//! the session mutates them, and every committed change becomes exactly one
//! broadcast.
//!
//! ### Ordered Replication
//! All broadcasts of a session go through one unbounded channel, so they
//! leave in commit order. Per-value revisions let observers drop datagrams
//! that arrive late or twice.
//!
//! ### Collaborators
//! Physics stays behind the [`world::World`] trait. The transport only moves
//! commands in and broadcasts out.
//!
//! ## Module Organization
//!
//! - `session`: the `Lobby -> Active -> Ended` state machine and gameplay bookkeeping
//! - `roster`: participants in join order, capacity, names and classes
//! - `countdown`: generation-checked countdowns and their tokio tick source
//! - `ledger`: kill, death and ping counters with atomic kill recording
//! - `victory`: ordered match-ending conditions
//! - `spawn`: spawn point selection with per-point cooldown
//! - `world`: the physics collaborator and a kinematic stand-in
//! - `client_manager`: address to participant table, intent sequencing, pings, timeouts
//! - `network`: UDP transport and the main loop
//! - `config`: command-line arguments and session rules
//! - `error`: the session error taxonomy
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::SessionConfig;
//! use server::network::Server;
//! use server::world::KinematicWorld;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(33),
//!         Duration::from_secs(5),
//!         SessionConfig::default(),
//!         Box::new(KinematicWorld::new()),
//!     )
//!     .await?;
//!
//!     // Runs until the match ends
//!     let reason = server.run().await?;
//!     println!("match ended: {:?}", reason);
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod countdown;
pub mod error;
pub mod ledger;
pub mod network;
pub mod roster;
pub mod session;
pub mod spawn;
pub mod victory;
pub mod world;
