//! AeroGPU protocol modules, one per guest-visible header.

pub mod aerogpu_cmd;
pub mod aerogpu_pci;
pub mod aerogpu_ring;
pub mod cmd_writer;
