//! # Link
//!
//! In-memory handle on a kernel BPF link, binding a loaded program to a hook.
//! Links are created by the attach functions of the [`tracing`] and
//! [`freplace`] modules, or rebuilt from a pin (see [`crate::pin`]).
//!
//! Dropping (or closing) a link releases our reference on it; a pinned link
//! stays attached until its pin is removed too.

use std::{
    fmt,
    os::fd::{AsFd, OwnedFd},
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::debug;

use crate::{
    error::LinkError,
    handle::{HandleFd, KernelHandle},
    pin,
    program::AttachType,
    sys,
};

pub mod freplace;
pub mod tracing;

/// Kind of link, as far as attach and pin rules are concerned.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LinkVariant {
    /// fentry, fexit, fmod_ret and LSM links.
    Tracing,
    /// Links created by BPF_RAW_TRACEPOINT_OPEN for raw tracepoints.
    RawTracepoint,
    /// Program extension links.
    Freplace,
    /// Any other link type.
    Generic,
}

/// Attach family a link belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttachFamily {
    Tracing,
    RawTracepoint,
    Freplace,
    Other,
}

/// What can be done with a link of a given variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Capabilities {
    pub pinnable: bool,
    pub family: AttachFamily,
}

impl LinkVariant {
    pub fn capabilities(&self) -> Capabilities {
        use LinkVariant::*;
        let (pinnable, family) = match self {
            Tracing => (true, AttachFamily::Tracing),
            RawTracepoint => (false, AttachFamily::RawTracepoint),
            Freplace => (true, AttachFamily::Freplace),
            Generic => (true, AttachFamily::Other),
        };
        Capabilities { pinnable, family }
    }

    /// Variant of a link given the kernel reported link type and, for tracing
    /// links, attach type. Freplace links are tracing links without an attach
    /// type.
    pub fn from_kernel(link_type: u32, attach_type: u32) -> LinkVariant {
        match link_type {
            libbpf_sys::BPF_LINK_TYPE_RAW_TRACEPOINT => LinkVariant::RawTracepoint,
            libbpf_sys::BPF_LINK_TYPE_TRACING if attach_type == 0 => LinkVariant::Freplace,
            libbpf_sys::BPF_LINK_TYPE_TRACING => LinkVariant::Tracing,
            _ => LinkVariant::Generic,
        }
    }
}

impl fmt::Display for LinkVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use LinkVariant::*;
        match self {
            Tracing => write!(f, "tracing"),
            RawTracepoint => write!(f, "raw tracepoint"),
            Freplace => write!(f, "freplace"),
            Generic => write!(f, "generic"),
        }
    }
}

/// Kernel provided information about a link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkInfo {
    pub id: u32,
    pub program_id: u32,
    /// Raw kernel link type (BPF_LINK_TYPE_*).
    pub link_type: u32,
    /// Raw kernel attach type of tracing links, 0 for other link types.
    pub tracing_attach_type: u32,
}

impl LinkInfo {
    pub fn variant(&self) -> LinkVariant {
        LinkVariant::from_kernel(self.link_type, self.tracing_attach_type)
    }

    /// Attach type of tracing links. Attach types we don't know about are
    /// reported as None.
    pub fn attach_type(&self) -> Option<AttachType> {
        match self.link_type {
            libbpf_sys::BPF_LINK_TYPE_TRACING => {
                AttachType::try_from(self.tracing_attach_type).ok()
            }
            _ => None,
        }
    }
}

pub struct Link {
    handle: KernelHandle,
    variant: LinkVariant,
    pin_path: Mutex<Option<PathBuf>>,
}

impl Link {
    pub(crate) fn new(fd: OwnedFd, variant: LinkVariant) -> Link {
        Link {
            handle: KernelHandle::new(fd),
            variant,
            pin_path: Mutex::new(None),
        }
    }

    /// Link opened from the pin at `path`.
    pub(crate) fn from_pin(fd: OwnedFd, variant: LinkVariant, path: &Path) -> Link {
        Link {
            handle: KernelHandle::new(fd),
            variant,
            pin_path: Mutex::new(Some(path.to_path_buf())),
        }
    }

    pub fn variant(&self) -> LinkVariant {
        self.variant
    }

    pub fn capabilities(&self) -> Capabilities {
        self.variant.capabilities()
    }

    pub fn is_pinnable(&self) -> bool {
        self.capabilities().pinnable
    }

    /// Path the link is pinned at, if any.
    pub fn pin_path(&self) -> Option<PathBuf> {
        self.pin_path.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn as_fd(&self) -> Result<HandleFd<'_>, LinkError> {
        self.handle.as_fd()
    }

    /// Release our reference on the link. Pins are left untouched: a pinned
    /// link stays attached.
    pub fn close(&self) -> Result<(), LinkError> {
        if !self.handle.is_closed() {
            debug!("Closing {} link", self.variant);
        }
        self.handle.close()
    }

    pub fn info(&self) -> Result<LinkInfo, LinkError> {
        let info = sys::link_info(self.as_fd()?.as_fd())
            .map_err(|e| LinkError::from_syscall("BPF_OBJ_GET_INFO_BY_FD", e))?;
        Ok(raw_to_info(&info))
    }

    /// Pin the link at `path`, which must be on a bpffs mount.
    pub fn pin<P: AsRef<Path>>(&self, path: P) -> Result<(), LinkError> {
        let path = path.as_ref();
        let fd = self.as_fd()?;
        if !self.is_pinnable() {
            return Err(LinkError::NotPinnable {
                variant: self.variant,
            });
        }

        let mut pin_path = self.pin_path.lock().unwrap();
        if let Some(current) = pin_path.as_ref() {
            return Err(LinkError::AlreadyPinned {
                path: current.clone(),
            });
        }

        pin::check_bpffs(path)?;
        match sys::obj_pin(fd.as_fd(), path) {
            Ok(()) => debug!("Pinned {} link at {}", self.variant, path.display()),
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                if !self.is_pinned_at(path)? {
                    return Err(LinkError::PinExists {
                        path: path.to_path_buf(),
                    });
                }
                debug!(
                    "{} link already pinned at {}, adopting the pin",
                    self.variant,
                    path.display()
                );
            }
            Err(e) => return Err(LinkError::from_syscall("BPF_OBJ_PIN", e)),
        }

        *pin_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Remove the pin of the link. The link itself stays open. A closed link
    /// can't be unpinned, use [`crate::pin::unpin`] with its former pin path.
    pub fn unpin(&self) -> Result<(), LinkError> {
        if self.handle.is_closed() {
            return Err(LinkError::Closed);
        }

        let mut pin_path = self.pin_path.lock().unwrap();
        let path = pin_path.clone().ok_or(LinkError::NotPinned)?;

        pin::remove_pin(&path)?;
        debug!("Unpinned {} link from {}", self.variant, path.display());

        *pin_path = None;
        Ok(())
    }

    /// Does the pin at `path` refer to this very link?
    fn is_pinned_at(&self, path: &Path) -> Result<bool, LinkError> {
        let other =
            sys::obj_get(path, 0).map_err(|e| LinkError::from_syscall("BPF_OBJ_GET", e))?;
        if !sys::fd_is_link(other.as_fd()).map_err(|e| LinkError::Io {
            path: path.to_path_buf(),
            io_error: e,
        })? {
            return Ok(false);
        }

        let other = sys::link_info(other.as_fd())
            .map_err(|e| LinkError::from_syscall("BPF_OBJ_GET_INFO_BY_FD", e))?;
        Ok(other.id == self.info()?.id)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("variant", &self.variant)
            .field("handle", &self.handle)
            .field("pin_path", &self.pin_path())
            .finish()
    }
}

pub(crate) fn raw_to_info(info: &libbpf_sys::bpf_link_info) -> LinkInfo {
    let tracing_attach_type = match info.type_ {
        libbpf_sys::BPF_LINK_TYPE_TRACING => sys::tracing_attach_type(info),
        _ => 0,
    };

    LinkInfo {
        id: info.id,
        program_id: info.prog_id,
        link_type: info.type_,
        tracing_attach_type,
    }
}

#[cfg(test)]
impl Link {
    /// Link backed by /dev/null, for tests not reaching the kernel.
    pub(crate) fn fake(variant: LinkVariant) -> Link {
        Link::new(
            OwnedFd::from(std::fs::File::open("/dev/null").unwrap()),
            variant,
        )
    }
}
