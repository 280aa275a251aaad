//! # Session Observer Client
//!
//! Headless client for the arena session server. It joins the lobby over
//! UDP, forwards console commands as sequenced intents and mirrors every
//! replicated value the server broadcasts.
//!
//! ## Module Organization
//!
//! ### Input (`input`)
//! Parses console lines into intents and numbers them for the wire.
//!
//! ### Mirror (`mirror`)
//! Observer copies of the session's replicated values. Stale or duplicated
//! deltas are dropped by revision, and the match clock is held back until
//! the match is visibly active.
//!
//! ### Network (`network`)
//! The UDP loop: handshake retries, ping replies, broadcast application and
//! a clean disconnect on quit.
//!
//! ### Presentation (`presentation`)
//! The [`presentation::Presenter`] trait and a console implementation.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::network::Client;
//! use client::presentation::ConsolePresenter;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (lines_tx, lines_rx) = mpsc::unbounded_channel();
//! let mut client = Client::new("127.0.0.1:8080", 0, Box::new(ConsolePresenter::new())).await?;
//! lines_tx.send("name Ana".to_string())?;
//! let outcome = client.run(lines_rx).await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod input;
pub mod mirror;
pub mod network;
pub mod presentation;
