//! Live MPEG-TS relay with inline stream probing and per-second telemetry.

pub mod adapters;
pub mod bits;
pub mod config;
pub mod constants;
pub mod es;
pub mod ipc;
pub mod metadata;
pub mod pipeline;
pub mod probe;
pub mod psi;
pub mod relay;
pub mod stats;
pub mod telemetry;
