//! # Freplace
//!
//! Attachment of program extensions, replacing a global function of another
//! BPF program. The function to replace is given either when loading the
//! extension or when attaching it, never both.

use std::{io, os::fd::AsFd};

use log::debug;

use super::{Link, LinkVariant};
use crate::{
    error::LinkError,
    inspect::features,
    program::{Program, ProgramType},
    sys,
};

/// Where the replaced function comes from.
#[derive(Debug)]
pub(crate) enum ResolvedTarget<'a> {
    /// Set when the extension was loaded.
    LoadTime,
    /// Given at attach time.
    Explicit {
        program: &'a Program,
        function: &'a str,
    },
}

/// Validate an attach request and tell which target to use. Does not issue
/// any syscall.
pub(crate) fn resolve_target<'a>(
    target: Option<&'a Program>,
    function: Option<&'a str>,
    replacement: &Program,
) -> Result<ResolvedTarget<'a>, LinkError> {
    if replacement.prog_type() != ProgramType::Extension {
        return Err(LinkError::InvalidRequest(format!(
            "freplace needs an Extension program, {} is {:?}",
            replacement.name(),
            replacement.prog_type()
        )));
    }

    let function = function.filter(|f| !f.is_empty());
    let explicit = match (target, function) {
        (Some(program), Some(function)) => Some((program, function)),
        (None, None) => None,
        (Some(_), None) => {
            return Err(LinkError::InvalidRequest(
                "freplace target program given without a function name".to_string(),
            ))
        }
        (None, Some(function)) => {
            return Err(LinkError::InvalidRequest(format!(
                "freplace function {function} given without a target program"
            )))
        }
    };

    match (replacement.attach_target(), explicit) {
        (Some(_), Some(_)) => Err(LinkError::ConflictingTarget),
        (None, None) => Err(LinkError::MissingTarget),
        (Some(_), None) => Ok(ResolvedTarget::LoadTime),
        (None, Some((program, function))) => {
            if program.is_closed() {
                return Err(LinkError::Closed);
            }
            Ok(ResolvedTarget::Explicit { program, function })
        }
    }
}

fn attach_error(call: &'static str, io_error: io::Error) -> LinkError {
    match io_error.raw_os_error() {
        Some(libc::EINVAL) | Some(libc::EACCES) => LinkError::VerifierRejected { call, io_error },
        _ => LinkError::from_syscall(call, io_error),
    }
}

/// Replace a function of a BPF program with `replacement`.
///
/// `target` and `function` name the function to replace and must be given
/// together, unless the replacement was loaded with a target already, in
/// which case both must be `None` (an empty function name counts as `None`).
pub fn attach_freplace(
    target: Option<&Program>,
    function: Option<&str>,
    replacement: &Program,
) -> Result<Link, LinkError> {
    let resolved = resolve_target(target, function, replacement)?;
    let fd = replacement.fd()?;
    let features = features()?;

    let (call, res) = match resolved {
        ResolvedTarget::LoadTime if features.link_create_freplace => {
            ("BPF_LINK_CREATE", sys::link_create(fd.as_fd(), None, 0, 0, 0))
        }
        ResolvedTarget::LoadTime => (
            "BPF_RAW_TRACEPOINT_OPEN",
            sys::raw_tracepoint_open(fd.as_fd(), None),
        ),
        ResolvedTarget::Explicit { program, function } => {
            if !features.link_create_freplace {
                return Err(LinkError::Unsupported {
                    feature: "freplace with an attach time target".to_string(),
                });
            }

            let btf_id = program.func_btf_id(function)?;
            (
                "BPF_LINK_CREATE",
                sys::link_create(fd.as_fd(), Some(program.fd()?.as_fd()), 0, btf_id, 0),
            )
        }
    };
    let link_fd = res.map_err(|e| attach_error(call, e))?;

    match replacement.attach_target() {
        Some(t) => debug!(
            "Replaced {} of program {} with {}",
            t.function,
            t.program_id,
            replacement.name()
        ),
        None => debug!(
            "Replaced {} of program {} with {}",
            function.unwrap_or_default(),
            target.map(|t| t.name()).unwrap_or_default(),
            replacement.name()
        ),
    }
    Ok(Link::new(link_fd, LinkVariant::Freplace))
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::{
        error::ErrorCategory,
        pin,
        program::{
            test_programs::{freplace_target, replacement},
            AttachType,
        },
    };

    fn extension() -> Program {
        Program::fake(ProgramType::Extension, AttachType::None)
    }

    fn target() -> Program {
        Program::fake(ProgramType::RawTracepoint, AttachType::None)
    }

    #[test]
    fn not_an_extension() {
        let prog = Program::fake(ProgramType::Tracing, AttachType::TraceFEntry);
        let target = target();
        assert!(matches!(
            resolve_target(Some(&target), Some("subprog"), &prog),
            Err(LinkError::InvalidRequest(_))
        ));
    }

    #[test]
    fn load_time_target() {
        let prog = Program::fake_with_target("subprog");
        assert!(matches!(
            resolve_target(None, None, &prog),
            Ok(ResolvedTarget::LoadTime)
        ));
        // An empty function name is no function name.
        assert!(matches!(
            resolve_target(None, Some(""), &prog),
            Ok(ResolvedTarget::LoadTime)
        ));
    }

    #[test]
    fn explicit_target() {
        let prog = extension();
        let target = target();
        match resolve_target(Some(&target), Some("subprog"), &prog) {
            Ok(ResolvedTarget::Explicit { program, function }) => {
                assert!(std::ptr::eq(program, &target));
                assert_eq!(function, "subprog");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn conflicting_target() {
        let prog = Program::fake_with_target("subprog");
        let target = target();
        let err = resolve_target(Some(&target), Some("subprog"), &prog).unwrap_err();
        assert!(matches!(err, LinkError::ConflictingTarget));
        assert_eq!(err.category(), ErrorCategory::InvalidRequest);
    }

    #[test]
    fn missing_target() {
        let prog = extension();
        assert!(matches!(
            resolve_target(None, None, &prog),
            Err(LinkError::MissingTarget)
        ));
        assert!(matches!(
            resolve_target(None, Some(""), &prog),
            Err(LinkError::MissingTarget)
        ));
    }

    #[test]
    fn partial_target() {
        let prog = extension();
        let target = target();
        assert!(matches!(
            resolve_target(Some(&target), None, &prog),
            Err(LinkError::InvalidRequest(_))
        ));
        assert!(matches!(
            resolve_target(Some(&target), Some(""), &prog),
            Err(LinkError::InvalidRequest(_))
        ));
        assert!(matches!(
            resolve_target(None, Some("subprog"), &prog),
            Err(LinkError::InvalidRequest(_))
        ));
    }

    #[test]
    fn closed_programs() {
        let prog = extension();
        let target = target();
        target.close().unwrap();
        assert!(matches!(
            resolve_target(Some(&target), Some("subprog"), &prog),
            Err(LinkError::Closed)
        ));

        let prog = Program::fake_with_target("subprog");
        prog.close().unwrap();
        assert!(matches!(
            attach_freplace(None, None, &prog),
            Err(LinkError::Closed)
        ));
    }

    #[test]
    fn errno_mapping() {
        let err = attach_error("BPF_LINK_CREATE", io::Error::from_raw_os_error(libc::EINVAL));
        assert_eq!(err.category(), ErrorCategory::VerifierRejected);
        let err = attach_error("BPF_LINK_CREATE", io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(err.category(), ErrorCategory::VerifierRejected);
        let err = attach_error("BPF_LINK_CREATE", io::Error::from_raw_os_error(libc::EPERM));
        assert_eq!(err.category(), ErrorCategory::Kernel);
        let err = attach_error(
            "BPF_LINK_CREATE",
            io::Error::from_raw_os_error(libc::EOPNOTSUPP),
        );
        assert!(err.is_unsupported());
    }

    #[test]
    #[serial(bpf)]
    #[cfg_attr(not(feature = "test_cap_bpf"), ignore)]
    fn freplace_load_time() {
        let target = freplace_target();
        let prog = replacement(&target);

        let link = attach_freplace(None, None, &prog).unwrap();
        assert_eq!(link.variant(), LinkVariant::Freplace);
        assert!(link.is_pinnable());

        let info = link.info().unwrap();
        assert_eq!(info.variant(), LinkVariant::Freplace);
        assert_eq!(info.program_id, prog.info().unwrap().id);

        let path = "/sys/fs/bpf/retis_link_freplace";
        link.pin(path).unwrap();
        link.close().unwrap();

        let loaded = pin::load_pinned_freplace(path).unwrap();
        assert_eq!(loaded.info().unwrap().id, info.id);
        assert!(matches!(
            pin::load_pinned_tracing(path),
            Err(LinkError::TypeMismatch { .. })
        ));
        loaded.unpin().unwrap();
    }

    #[test]
    #[serial(bpf)]
    #[cfg_attr(not(feature = "test_cap_bpf"), ignore)]
    fn freplace_explicit() {
        let target = freplace_target();
        let loaded = replacement(&target);

        // Same program, seen without its load-time target.
        let fd = loaded.fd().unwrap().as_fd().try_clone_to_owned().unwrap();
        let prog = Program::from_fd(fd, "replacement", ProgramType::Extension, AttachType::None);
        assert!(prog.attach_target().is_none());

        assert!(matches!(
            attach_freplace(Some(&target), Some("subprog"), &loaded),
            Err(LinkError::ConflictingTarget)
        ));
        assert!(matches!(
            attach_freplace(Some(&target), Some("retis_link_unknown"), &prog),
            Err(LinkError::InvalidRequest(_))
        ));

        let link = attach_freplace(Some(&target), Some("subprog"), &prog).unwrap();
        assert_eq!(link.variant(), LinkVariant::Freplace);
        assert_eq!(link.info().unwrap().variant(), LinkVariant::Freplace);
        link.close().unwrap();
    }
}
