//! Event stream framing.

pub mod framer;

pub use framer::{frame_stream, parse_line, EventFramer, FrameError};
