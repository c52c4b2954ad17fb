//! # Pin
//!
//! Persistence of links in bpffs: pin path validation, loading links back
//! from a pin and removing pins. [`PinStore`] handles names relative to a
//! bpffs directory, the free functions take full paths.

use std::{
    fs, io,
    os::fd::AsFd,
    path::{Component, Path, PathBuf},
};

use log::debug;
use nix::sys::statfs::statfs;

use crate::{
    config::PinStoreConfig,
    error::LinkError,
    link::{raw_to_info, Link, LinkVariant},
    sys,
};

/// Magic of bpffs, see include/uapi/linux/magic.h.
const BPF_FS_MAGIC: u32 = 0xcafe4a11;

/// Access mode of a link loaded from a pin.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LoadPinOptions {
    pub read_only: bool,
    pub write_only: bool,
}

impl LoadPinOptions {
    pub(crate) fn file_flags(&self) -> Result<u32, LinkError> {
        Ok(match (self.read_only, self.write_only) {
            (true, true) => {
                return Err(LinkError::InvalidRequest(
                    "pins can't be opened both read-only and write-only".to_string(),
                ))
            }
            (true, false) => libbpf_sys::BPF_F_RDONLY as u32,
            (false, true) => libbpf_sys::BPF_F_WRONLY as u32,
            (false, false) => 0,
        })
    }
}

/// Check `path` can be used as a pin path: its parent directory must be on
/// a bpffs mount.
pub(crate) fn check_bpffs(path: &Path) -> Result<(), LinkError> {
    let invalid = |reason: String| LinkError::InvalidPinPath {
        path: path.to_path_buf(),
        reason,
    };

    if path.file_name().is_none() {
        return Err(invalid("no file name".to_string()));
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let stat = statfs(parent).map_err(|e| invalid(format!("can't stat {}: {e}", parent.display())))?;
    if stat.filesystem_type().0 as u32 != BPF_FS_MAGIC {
        return Err(invalid(format!("{} is not on a bpffs mount", parent.display())));
    }
    Ok(())
}

/// Remove the pin at `path`.
pub(crate) fn remove_pin(path: &Path) -> Result<(), LinkError> {
    fs::remove_file(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => LinkError::NotFound {
            path: path.to_path_buf(),
        },
        _ => LinkError::Io {
            path: path.to_path_buf(),
            io_error: e,
        },
    })
}

/// Open the link pinned at `path`. When `expected` is given, the pinned link
/// must be of that variant.
pub fn load_pinned<P: AsRef<Path>>(
    path: P,
    expected: Option<LinkVariant>,
    opts: &LoadPinOptions,
) -> Result<Link, LinkError> {
    let path = path.as_ref();
    let fd = sys::obj_get(path, opts.file_flags()?).map_err(|e| match e.raw_os_error() {
        Some(libc::ENOENT) => LinkError::NotFound {
            path: path.to_path_buf(),
        },
        _ => LinkError::from_syscall("BPF_OBJ_GET", e),
    })?;

    let not_a_link = || LinkError::TypeMismatch {
        expected: expected.unwrap_or(LinkVariant::Generic),
        found: "not a link".to_string(),
    };
    if !sys::fd_is_link(fd.as_fd()).map_err(|e| LinkError::Io {
        path: path.to_path_buf(),
        io_error: e,
    })? {
        return Err(not_a_link());
    }

    let info = match sys::link_info(fd.as_fd()) {
        Ok(info) => raw_to_info(&info),
        Err(e) if e.raw_os_error() == Some(libc::EINVAL) => return Err(not_a_link()),
        Err(e) => return Err(LinkError::from_syscall("BPF_OBJ_GET_INFO_BY_FD", e)),
    };

    let variant = info.variant();
    if let Some(expected) = expected {
        if expected != variant {
            return Err(LinkError::TypeMismatch {
                expected,
                found: format!("{variant} link"),
            });
        }
    }

    debug!(
        "Loaded {variant} link {} (program {}) from {}",
        info.id,
        info.program_id,
        path.display()
    );
    Ok(Link::from_pin(fd, variant, path))
}

/// Open the tracing link pinned at `path`.
pub fn load_pinned_tracing<P: AsRef<Path>>(path: P) -> Result<Link, LinkError> {
    load_pinned(path, Some(LinkVariant::Tracing), &LoadPinOptions::default())
}

/// Open the freplace link pinned at `path`.
pub fn load_pinned_freplace<P: AsRef<Path>>(path: P) -> Result<Link, LinkError> {
    load_pinned(path, Some(LinkVariant::Freplace), &LoadPinOptions::default())
}

/// Open the raw tracepoint link pinned at `path`. Raw tracepoint links
/// created by this crate can't be pinned, this is for pins made by other
/// tools.
pub fn load_pinned_raw_tracepoint<P: AsRef<Path>>(path: P) -> Result<Link, LinkError> {
    load_pinned(
        path,
        Some(LinkVariant::RawTracepoint),
        &LoadPinOptions::default(),
    )
}

/// Remove the pin at `path`. Links opened from it are not affected.
pub fn unpin<P: AsRef<Path>>(path: P) -> Result<(), LinkError> {
    let path = path.as_ref();
    remove_pin(path)?;
    debug!("Removed pin {}", path.display());
    Ok(())
}

/// Pins under a single bpffs directory.
#[derive(Clone, Debug)]
pub struct PinStore {
    root: PathBuf,
}

impl PinStore {
    pub fn new(config: &PinStoreConfig) -> Self {
        PinStore {
            root: config.bpffs.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of a pin. Relative names are taken from the store root and
    /// can't go up the hierarchy, absolute ones must be inside the root.
    pub fn path<P: AsRef<Path>>(&self, name: P) -> Result<PathBuf, LinkError> {
        let name = name.as_ref();
        let invalid = |reason: &str| LinkError::InvalidPinPath {
            path: name.to_path_buf(),
            reason: reason.to_string(),
        };

        if name.components().any(|c| c == Component::ParentDir) {
            return Err(invalid("parent directory components are not allowed"));
        }

        let path = if name.is_absolute() {
            if !name.starts_with(&self.root) {
                return Err(invalid(&format!(
                    "not under {}",
                    self.root.display()
                )));
            }
            name.to_path_buf()
        } else {
            self.root.join(name)
        };

        if path == self.root {
            return Err(invalid("no pin name"));
        }
        Ok(path)
    }

    pub fn pin<P: AsRef<Path>>(&self, link: &Link, name: P) -> Result<PathBuf, LinkError> {
        let path = self.path(name)?;
        link.pin(&path)?;
        Ok(path)
    }

    pub fn load<P: AsRef<Path>>(
        &self,
        name: P,
        expected: Option<LinkVariant>,
        opts: &LoadPinOptions,
    ) -> Result<Link, LinkError> {
        load_pinned(self.path(name)?, expected, opts)
    }

    pub fn unpin<P: AsRef<Path>>(&self, name: P) -> Result<(), LinkError> {
        unpin(self.path(name)?)
    }
}
