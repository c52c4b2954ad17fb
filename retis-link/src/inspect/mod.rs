//! # Inspection helpers
//!
//! Provides support for inspecting the running kernel, to select the right
//! bpf(2) requests for it.

mod features;
pub use features::*;
pub(crate) mod kernel_version;
pub use kernel_version::KernelVersion;
