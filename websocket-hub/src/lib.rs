//! Websocket chat hub: every message a client sends is broadcast to every
//! logged-in client.
//!
//! - [`hub`] owns the client registry. A single task applies join, leave and
//!   broadcast events one at a time, so the registry is never shared.
//! - [`connection`] runs one client's read loop, translating frames into hub
//!   events, and drains the client's outbound queue into its socket.
//! - [`message`] defines the JSON wire protocol.
//! - [`ws`] adapts axum websockets to the connection handler.
//! - [`server`] ties the listener, router and hub lifecycle together.
//! - [`cli`] parses listener and queue settings.

pub mod cli;
pub mod connection;
pub mod hub;
pub mod message;
pub mod server;
pub mod ws;
