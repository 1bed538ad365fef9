//! STOMP client for reporting and following live football matches.
//!
//! Users log in to a broker, join per-match channels named
//! `<team a>_<team b>`, report events from JSON files, and write match
//! summaries built from what other users reported. Each module focuses on
//! a concrete responsibility:
//!
//! - [`frame`] encodes and decodes NUL-terminated STOMP frames and reads or
//!   writes them over async streams.
//! - [`event`] holds the event record, its SEND body grammar, and the JSON
//!   event file loader.
//! - [`registry`] tracks subscription ids and receipts awaiting a reply.
//! - [`ledger`] keeps per-game, per-user histories in halftime order.
//! - [`summary`] folds a history into the summary document.
//! - [`session`] is the state machine tying those together.
//! - [`command`] parses keyboard lines and dispatches them to the session.
//! - [`client`] runs the terminal loop over a TCP connection.
//! - [`broker`] is a small in-memory broker for local play and tests.
//! - [`cli`] parses the command-line interface.

pub mod broker;
pub mod cli;
pub mod client;
pub mod command;
pub mod error;
pub mod event;
pub mod frame;
pub mod ledger;
pub mod registry;
pub mod session;
pub mod summary;
