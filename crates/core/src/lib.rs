//! RTSP/RTP live video streaming for camera feeds.
//!
//! A [`Server`] publishes one H.264 or H.265 stream under a single path.
//! Clients negotiate it over RTSP (RFC 2326) and receive RTP (RFC 3550)
//! either as UDP datagrams or interleaved in the RTSP connection. The
//! application feeds encoded [`AccessUnit`]s with [`Server::push_frame`].
//!
//! ```no_run
//! use std::time::Duration;
//! use rtsp::{AccessUnit, Codec, Server, ServerConfig};
//!
//! let server = Server::new(ServerConfig::with_port(8554, 4));
//! server.start()?;
//! let frame = [0u8, 0, 0, 1, 0x65, 0x88, 0x84];
//! server.push_frame(AccessUnit::from_annex_b(Codec::H264, &frame, Duration::ZERO))?;
//! server.stop();
//! # Ok::<(), rtsp::RtspError>(())
//! ```

pub mod config;
pub mod error;
pub mod media;
pub mod mount;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use config::{ServerConfig, StreamConfig};
pub use error::{Result, RtspError};
pub use media::{AccessUnit, Codec, Packetizer};
pub use server::Server;
pub use session::SessionState;
pub use stats::{ServerStats, SessionStats};
