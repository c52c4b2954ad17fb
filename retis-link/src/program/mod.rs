//! # Program
//!
//! Loaded BPF programs, as seen by the link layer: a file descriptor, a
//! program type, an expected attach type and, for BTF-enabled programs, the
//! target resolved at load time. A minimal loader is provided for programs
//! built from raw instructions; programs loaded by other means can be wrapped
//! with [`Program::from_fd`].

use std::{
    fmt,
    os::fd::{AsFd, OwnedFd},
};

use crate::{
    error::LinkError,
    handle::{HandleFd, KernelHandle},
    sys,
};

mod btf;
pub use btf::FuncInfo;
mod insn;
pub use insn::{BpfReg, Insn};
mod loader;
pub use loader::ProgramSpec;
#[cfg(test)]
pub(crate) use loader::test_programs;

/// Program types the link layer knows about.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ProgramType {
    SocketFilter = libbpf_sys::BPF_PROG_TYPE_SOCKET_FILTER as u32,
    RawTracepoint = libbpf_sys::BPF_PROG_TYPE_RAW_TRACEPOINT as u32,
    Tracing = libbpf_sys::BPF_PROG_TYPE_TRACING as u32,
    Extension = libbpf_sys::BPF_PROG_TYPE_EXT as u32,
    Lsm = libbpf_sys::BPF_PROG_TYPE_LSM as u32,
}

impl ProgramType {
    /// Programs of those types are attached to a BTF-described kernel
    /// function, resolved at load time.
    pub(crate) fn needs_vmlinux_btf(&self) -> bool {
        matches!(self, ProgramType::Tracing | ProgramType::Lsm)
    }
}

/// Expected attach types the link layer knows about.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AttachType {
    /// No attach type, used by freplace programs.
    None = 0,
    TraceRawTp = libbpf_sys::BPF_TRACE_RAW_TP as u32,
    TraceFEntry = libbpf_sys::BPF_TRACE_FENTRY as u32,
    TraceFExit = libbpf_sys::BPF_TRACE_FEXIT as u32,
    ModifyReturn = libbpf_sys::BPF_MODIFY_RETURN as u32,
    LsmMac = libbpf_sys::BPF_LSM_MAC as u32,
}

impl TryFrom<u32> for AttachType {
    type Error = LinkError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use AttachType::*;
        [None, TraceRawTp, TraceFEntry, TraceFExit, ModifyReturn, LsmMac]
            .into_iter()
            .find(|t| *t as u32 == value)
            .ok_or_else(|| LinkError::InvalidRequest(format!("unknown attach type {value}")))
    }
}

/// Target of a freplace program, set when it was loaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachTarget {
    /// Id of the program being replaced.
    pub program_id: u32,
    /// Function of the target program being replaced.
    pub function: String,
}

/// Kernel provided information about a loaded program.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProgramInfo {
    pub id: u32,
    /// Id of the program BTF object, 0 if it has none.
    pub btf_id: u32,
}

/// A program loaded in the kernel.
pub struct Program {
    handle: KernelHandle,
    name: String,
    prog_type: ProgramType,
    attach_type: AttachType,
    attach_to: Option<String>,
    attach_target: Option<AttachTarget>,
}

impl Program {
    /// Wrap a program loaded by other means (eg. libbpf). No load-time
    /// freplace target is recorded for those.
    pub fn from_fd(
        fd: OwnedFd,
        name: &str,
        prog_type: ProgramType,
        attach_type: AttachType,
    ) -> Program {
        Program {
            handle: KernelHandle::new(fd),
            name: name.to_string(),
            prog_type,
            attach_type,
            attach_to: None,
            attach_target: None,
        }
    }

    pub fn fd(&self) -> Result<HandleFd<'_>, LinkError> {
        self.handle.as_fd()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prog_type(&self) -> ProgramType {
        self.prog_type
    }

    pub fn attach_type(&self) -> AttachType {
        self.attach_type
    }

    /// Kernel function the program was loaded for, if any.
    pub fn attach_to(&self) -> Option<&str> {
        self.attach_to.as_deref()
    }

    /// Program and function replaced by this (freplace) program, if set when
    /// loading it.
    pub fn attach_target(&self) -> Option<&AttachTarget> {
        self.attach_target.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Release our reference on the program. Links created from it are not
    /// affected.
    pub fn close(&self) -> Result<(), LinkError> {
        self.handle.close()
    }

    pub fn info(&self) -> Result<ProgramInfo, LinkError> {
        let info = sys::prog_info(self.fd()?.as_fd()).map_err(|e| LinkError::Syscall {
            call: "BPF_OBJ_GET_INFO_BY_FD",
            io_error: e,
        })?;

        Ok(ProgramInfo {
            id: info.id,
            btf_id: info.btf_id,
        })
    }

    /// BTF id of one of the program's functions.
    pub(crate) fn func_btf_id(&self, function: &str) -> Result<u32, LinkError> {
        let info = self.info()?;
        if info.btf_id == 0 {
            return Err(LinkError::InvalidRequest(format!(
                "program {} has no BTF, can't find function {function}",
                self.name
            )));
        }

        sys::btf_func_id(info.btf_id, function).map_err(|e| {
            LinkError::InvalidRequest(format!(
                "can't find function {function} in program {}: {e}",
                self.name
            ))
        })
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("type", &self.prog_type)
            .field("attach_type", &self.attach_type)
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
impl Program {
    /// Program backed by /dev/null, for tests not reaching the kernel.
    pub(crate) fn fake(prog_type: ProgramType, attach_type: AttachType) -> Program {
        let fd = OwnedFd::from(std::fs::File::open("/dev/null").unwrap());
        Program::from_fd(fd, "fake", prog_type, attach_type)
    }

    /// Same as fake(), with a load-time freplace target recorded.
    pub(crate) fn fake_with_target(function: &str) -> Program {
        let mut prog = Self::fake(ProgramType::Extension, AttachType::None);
        prog.attach_target = Some(AttachTarget {
            program_id: 1,
            function: function.to_string(),
        });
        prog
    }
}
