//! Guest/host wire ABI shared between the AeroGPU guest driver and the host
//! command processor.
//!
//! Everything here is plain data plus validation: no host GPU state lives in
//! this crate. See `aero-gpu` for the processor that consumes these streams.

pub mod aerogpu;
