use std::{ffi::CString, os::fd::AsFd};

use log::debug;

use super::{btf, AttachTarget, AttachType, FuncInfo, Insn, Program, ProgramType};
use crate::{error::LinkError, handle::KernelHandle, sys};

/// Description of a program to load.
pub struct ProgramSpec<'a> {
    pub name: String,
    pub prog_type: ProgramType,
    pub attach_type: AttachType,
    /// Function to attach to: a kernel function for tracing and LSM
    /// programs, a function of `attach_target` for freplace programs.
    pub attach_to: Option<String>,
    /// Program to replace a function of (freplace).
    pub attach_target: Option<&'a Program>,
    pub instructions: Vec<Insn>,
    /// Function layout of the instructions. Required for programs whose
    /// functions will be replaced.
    pub functions: Vec<FuncInfo>,
    pub license: String,
}

impl<'a> ProgramSpec<'a> {
    pub fn new(
        name: &str,
        prog_type: ProgramType,
        attach_type: AttachType,
        instructions: Vec<Insn>,
    ) -> Self {
        ProgramSpec {
            name: name.to_string(),
            prog_type,
            attach_type,
            attach_to: None,
            attach_target: None,
            instructions,
            functions: Vec::new(),
            license: "GPL".to_string(),
        }
    }
}

fn cstring(what: &str, s: &str) -> Result<CString, LinkError> {
    CString::new(s).map_err(|_| LinkError::InvalidRequest(format!("invalid {what} {s:?}")))
}

impl Program {
    /// Load a program in the kernel.
    pub fn load(spec: &ProgramSpec) -> Result<Program, LinkError> {
        let name = cstring("program name", &spec.name)?;
        let license = cstring("license", &spec.license)?;

        let mut attach_btf_id = 0;
        let mut target_fd = None;
        let mut attach_target = None;
        match (spec.attach_target, spec.attach_to.as_deref()) {
            (Some(target), Some(function)) => {
                attach_btf_id = target.func_btf_id(function)?;
                target_fd = Some(target.fd()?);
                attach_target = Some(AttachTarget {
                    program_id: target.info()?.id,
                    function: function.to_string(),
                });
            }
            (Some(target), None) => {
                return Err(LinkError::InvalidRequest(format!(
                    "attach target {} given without a function",
                    target.name()
                )))
            }
            (None, Some(function)) if spec.prog_type.needs_vmlinux_btf() => {
                attach_btf_id = sys::vmlinux_btf_id(function, spec.attach_type as u32)
                    .map_err(|e| {
                        LinkError::InvalidRequest(format!(
                            "can't find {function} in the kernel BTF: {e}"
                        ))
                    })?;
            }
            _ => (),
        }

        let btf = (!spec.functions.is_empty()).then(|| btf::encode(&spec.functions));
        let btf_fd = match &btf {
            Some(btf) => Some(sys::btf_load(&btf.data).map_err(|(io_error, verifier_log)| {
                LinkError::ProgramLoad {
                    io_error,
                    verifier_log,
                }
            })?),
            None => None,
        };

        let fd = sys::prog_load(&sys::ProgLoad {
            prog_type: spec.prog_type as u32,
            name: &name,
            license: &license,
            insns: &spec.instructions,
            expected_attach_type: spec.attach_type as u32,
            attach_btf_id,
            attach_prog_fd: target_fd.as_ref().map(|fd| fd.as_fd()),
            btf_fd: btf_fd.as_ref().map(|fd| fd.as_fd()),
            func_info: btf.as_ref().map(|b| b.func_info.as_slice()).unwrap_or(&[]),
        })
        .map_err(|(io_error, verifier_log)| LinkError::ProgramLoad {
            io_error,
            verifier_log,
        })?;

        debug!(
            "Loaded {:?} program {} (attach type {:?})",
            spec.prog_type, spec.name, spec.attach_type
        );

        Ok(Program {
            handle: KernelHandle::new(fd),
            name: spec.name.clone(),
            prog_type: spec.prog_type,
            attach_type: spec.attach_type,
            attach_to: spec.attach_to.clone(),
            attach_target,
        })
    }
}

/// Programs used by the tests needing CAP_BPF.
#[cfg(test)]
pub(crate) mod test_programs {
    use super::*;

    /// `return 0;` attached to a kernel function.
    pub(crate) fn tracing(
        prog_type: ProgramType,
        attach_type: AttachType,
        attach_to: &str,
    ) -> Program {
        let mut spec = ProgramSpec::new("probe", prog_type, attach_type, Insn::ret(0));
        spec.attach_to = Some(attach_to.to_string());
        Program::load(&spec).unwrap()
    }

    /// A raw tracepoint program calling a global `subprog` function, which
    /// can be replaced.
    pub(crate) fn freplace_target() -> Program {
        let mut spec = ProgramSpec::new(
            "target",
            ProgramType::RawTracepoint,
            AttachType::None,
            vec![
                Insn::call_local(1),
                Insn::exit(),
                Insn::mov64_imm(super::super::BpfReg::R0, 0),
                Insn::exit(),
            ],
        );
        spec.functions = vec![FuncInfo::new(0, "target"), FuncInfo::new(2, "subprog")];
        Program::load(&spec).unwrap()
    }

    /// Replacement for `subprog` of `target`.
    pub(crate) fn replacement(target: &Program) -> Program {
        let mut spec = ProgramSpec::new(
            "replacement",
            ProgramType::Extension,
            AttachType::None,
            Insn::ret(1),
        );
        spec.functions = vec![FuncInfo::new(0, "replacement")];
        spec.attach_target = Some(target);
        spec.attach_to = Some("subprog".to_string());
        Program::load(&spec).unwrap()
    }
}
