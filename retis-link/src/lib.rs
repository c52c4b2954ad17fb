//! # retis-link
//!
//! Lifecycle of kernel BPF links: attaching tracing (fentry, fexit,
//! fmod_ret, LSM, BTF raw tracepoints) and freplace programs, owning the
//! resulting links, pinning them in bpffs and getting them back from a pin.
//!
//! ```no_run
//! use retis_link::{
//!     attach_tracing, load_pinned_tracing, AttachType, Insn, Program, ProgramSpec,
//!     ProgramType, TraceOptions,
//! };
//!
//! # fn main() -> Result<(), retis_link::LinkError> {
//! let mut spec = ProgramSpec::new(
//!     "probe",
//!     ProgramType::Tracing,
//!     AttachType::TraceFEntry,
//!     Insn::ret(0),
//! );
//! spec.attach_to = Some("inet_dgram_connect".to_string());
//! let prog = Program::load(&spec)?;
//!
//! let link = attach_tracing(&TraceOptions::new(&prog))?;
//! link.pin("/sys/fs/bpf/probe")?;
//! link.close()?;
//!
//! // Later, possibly from another process.
//! let link = load_pinned_tracing("/sys/fs/bpf/probe")?;
//! link.unpin()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub use config::PinStoreConfig;
pub mod error;
pub use error::{ErrorCategory, LinkError};
pub mod handle;
pub use handle::{HandleFd, KernelHandle};
pub mod inspect;
pub use inspect::{features, Features, KernelVersion};
pub mod link;
pub use link::{
    freplace::attach_freplace,
    tracing::{attach_tracing, TraceOptions},
    AttachFamily, Capabilities, Link, LinkInfo, LinkVariant,
};
pub mod pin;
pub use pin::{
    load_pinned, load_pinned_freplace, load_pinned_raw_tracepoint, load_pinned_tracing, unpin,
    LoadPinOptions, PinStore,
};
pub mod program;
pub use program::{
    AttachTarget, AttachType, BpfReg, FuncInfo, Insn, Program, ProgramInfo, ProgramSpec,
    ProgramType,
};

mod sys;
