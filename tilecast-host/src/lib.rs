//! # tilecast-host: Serial Display Host
//!
//! Console program that serves images to a small display over a serial
//! link. The device drives the exchange: it asks for the catalog size,
//! fetches tiles or regions by index, and (on live firmware) requests
//! fresh screen captures.
//!
//! ## Modes
//!
//! - **Serve** (default): build the catalog, open the port, run one session.
//! - **Inspect** (`--inspect`): build and verify the catalog, then exit.

pub mod config;
pub mod serial;
pub mod service;
