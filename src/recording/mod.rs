//! # Live Recording Module
//!
//! Everything a single live-recording connection needs, independent of the
//! WebSocket transport that drives it (see `src/websocket.rs`).
//!
//! ## Key Components:
//! - **Session**: Per-connection state machine (open → finalizing → done)
//! - **Demultiplexer**: Splits inbound frames into control signals and audio payload
//! - **Chunk Sink**: Append-only temporary file for the audio
//! - **Session Timer**: Forces finalization after the maximum duration
//! - **Finalization Pipeline**: Pin → record → notify → delete, exactly once

pub mod artifact;
pub mod demux;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod timer;
