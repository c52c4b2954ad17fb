//! # Tracing
//!
//! Attachment of fentry, fexit, fmod_ret, LSM and BTF-enabled raw tracepoint
//! programs. Their target was resolved when the program was loaded, attaching
//! only creates the link.

use std::os::fd::AsFd;

use log::debug;

use super::{Link, LinkVariant};
use crate::{
    error::LinkError,
    inspect::{features, Features},
    program::{AttachType, Program, ProgramType},
    sys,
};

/// Options of a tracing attachment.
pub struct TraceOptions<'a> {
    pub program: &'a Program,
    /// BPF cookie made available to the program through
    /// bpf_get_attach_cookie(). 0 means no cookie.
    pub cookie: u64,
}

impl<'a> TraceOptions<'a> {
    pub fn new(program: &'a Program) -> Self {
        TraceOptions { program, cookie: 0 }
    }
}

/// bpf(2) command used to create a tracing link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TraceShape {
    LinkCreate,
    RawTracepointOpen,
}

/// Select the bpf(2) command to use for a given attach type on the running
/// kernel. Does not have side effects.
pub(crate) fn select_shape(
    attach_type: AttachType,
    cookie: u64,
    features: &Features,
) -> Result<TraceShape, LinkError> {
    let shape = match attach_type {
        AttachType::TraceRawTp => TraceShape::RawTracepointOpen,
        _ if features.link_create_tracing => TraceShape::LinkCreate,
        _ => TraceShape::RawTracepointOpen,
    };

    if cookie != 0 && (shape != TraceShape::LinkCreate || !features.tracing_cookie) {
        return Err(LinkError::Unsupported {
            feature: format!("BPF cookie on {attach_type:?} links"),
        });
    }

    Ok(shape)
}

/// Check the program can be attached as a tracing link.
fn check_program(program: &Program) -> Result<(), LinkError> {
    use AttachType::*;

    match (program.prog_type(), program.attach_type()) {
        (ProgramType::Tracing, TraceFEntry | TraceFExit | ModifyReturn | TraceRawTp) => Ok(()),
        (ProgramType::Lsm, LsmMac) => Ok(()),
        (prog_type, attach_type) => Err(LinkError::InvalidRequest(format!(
            "can't attach a {prog_type:?} program with attach type {attach_type:?} as a tracing link"
        ))),
    }
}

/// Attach a tracing or LSM program. The attach type and the target function
/// are the ones given when the program was loaded.
pub fn attach_tracing(opts: &TraceOptions) -> Result<Link, LinkError> {
    let program = opts.program;
    let fd = program.fd()?;
    check_program(program)?;

    let attach_type = program.attach_type();
    let shape = select_shape(attach_type, opts.cookie, features()?)?;
    let link_fd = match shape {
        TraceShape::LinkCreate => {
            sys::link_create(fd.as_fd(), None, attach_type as u32, 0, opts.cookie)
                .map_err(|e| LinkError::from_syscall("BPF_LINK_CREATE", e))?
        }
        TraceShape::RawTracepointOpen => sys::raw_tracepoint_open(fd.as_fd(), None)
            .map_err(|e| LinkError::from_syscall("BPF_RAW_TRACEPOINT_OPEN", e))?,
    };

    let variant = match attach_type {
        AttachType::TraceRawTp => LinkVariant::RawTracepoint,
        _ => LinkVariant::Tracing,
    };

    debug!(
        "Attached {} ({:?}) to {} using {shape:?}",
        program.name(),
        attach_type,
        program.attach_to().unwrap_or("<unknown>"),
    );
    Ok(Link::new(link_fd, variant))
}
