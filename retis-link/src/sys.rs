//! # Sys
//!
//! Thin wrappers around the libbpf low level API (bpf.h) used to create, pin
//! and inspect links, turning its negative errno returns into io::Error and
//! raw descriptors into OwnedFd.

use std::{
    ffi::{c_void, CStr, CString},
    fs, io, mem,
    os::{
        fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
        unix::ffi::OsStrExt,
    },
    path::Path,
    ptr,
};

use crate::program::Insn;

/// libbpf returns negative errnos.
fn libbpf_result(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        return Err(io::Error::from_raw_os_error(-ret));
    }
    Ok(ret)
}

fn libbpf_fd(ret: libc::c_int) -> io::Result<OwnedFd> {
    let fd = libbpf_result(ret)?;
    // SAFETY: libbpf returned a new file descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn path_to_cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// BPF_LINK_CREATE for tracing and freplace programs. libbpf only passes the
/// cookie for tracing attach types and rejects it alongside a target BTF id.
pub(crate) fn link_create(
    prog: BorrowedFd<'_>,
    target: Option<BorrowedFd<'_>>,
    attach_type: u32,
    target_btf_id: u32,
    cookie: u64,
) -> io::Result<OwnedFd> {
    let mut opts = libbpf_sys::bpf_link_create_opts {
        sz: mem::size_of::<libbpf_sys::bpf_link_create_opts>() as libbpf_sys::size_t,
        target_btf_id,
        ..Default::default()
    };
    opts.__bindgen_anon_1.tracing.cookie = cookie;

    // SAFETY: opts is a valid, sized, options struct.
    libbpf_fd(unsafe {
        libbpf_sys::bpf_link_create(
            prog.as_raw_fd(),
            target.map(|fd| fd.as_raw_fd()).unwrap_or(0),
            attach_type as libbpf_sys::bpf_attach_type,
            &opts,
        )
    })
}

/// BPF_RAW_TRACEPOINT_OPEN. BTF-enabled programs (tracing, LSM, freplace)
/// must not give a name, their target was set at load time.
pub(crate) fn raw_tracepoint_open(
    prog: BorrowedFd<'_>,
    name: Option<&CStr>,
) -> io::Result<OwnedFd> {
    // SAFETY: name is either NULL or a valid NUL terminated string.
    libbpf_fd(unsafe {
        libbpf_sys::bpf_raw_tracepoint_open(
            name.map(|n| n.as_ptr()).unwrap_or(ptr::null()),
            prog.as_raw_fd(),
        )
    })
}

pub(crate) fn obj_pin(fd: BorrowedFd<'_>, path: &Path) -> io::Result<()> {
    let path = path_to_cstring(path)?;
    // SAFETY: path is a valid NUL terminated string.
    libbpf_result(unsafe { libbpf_sys::bpf_obj_pin(fd.as_raw_fd(), path.as_ptr()) })?;
    Ok(())
}

pub(crate) fn obj_get(path: &Path, file_flags: u32) -> io::Result<OwnedFd> {
    let path = path_to_cstring(path)?;
    let opts = libbpf_sys::bpf_obj_get_opts {
        sz: mem::size_of::<libbpf_sys::bpf_obj_get_opts>() as libbpf_sys::size_t,
        file_flags,
        ..Default::default()
    };
    // SAFETY: path is a valid NUL terminated string, opts a sized options
    // struct.
    libbpf_fd(unsafe { libbpf_sys::bpf_obj_get_opts(path.as_ptr(), &opts) })
}

pub(crate) fn link_info(fd: BorrowedFd<'_>) -> io::Result<libbpf_sys::bpf_link_info> {
    let mut info = libbpf_sys::bpf_link_info::default();
    let mut len = mem::size_of::<libbpf_sys::bpf_link_info>() as u32;
    // SAFETY: info is zeroed and len is its size.
    libbpf_result(unsafe {
        libbpf_sys::bpf_link_get_info_by_fd(fd.as_raw_fd(), &mut info, &mut len)
    })?;
    Ok(info)
}

pub(crate) fn prog_info(fd: BorrowedFd<'_>) -> io::Result<libbpf_sys::bpf_prog_info> {
    let mut info = libbpf_sys::bpf_prog_info::default();
    let mut len = mem::size_of::<libbpf_sys::bpf_prog_info>() as u32;
    // SAFETY: info is zeroed and len is its size.
    libbpf_result(unsafe {
        libbpf_sys::bpf_prog_get_info_by_fd(fd.as_raw_fd(), &mut info, &mut len)
    })?;
    Ok(info)
}

/// Attach type of a tracing link. Meaningless for other link types.
pub(crate) fn tracing_attach_type(info: &libbpf_sys::bpf_link_info) -> u32 {
    // SAFETY: every union member is plain integers, the tracing one starts
    // with the attach type.
    unsafe { info.__bindgen_anon_1.tracing.attach_type }
}

/// Is the descriptor a BPF link? BPF_OBJ_GET_INFO_BY_FD succeeds on every
/// kind of BPF object, the fdinfo entry is what tells links apart.
pub(crate) fn fd_is_link(fd: BorrowedFd<'_>) -> io::Result<bool> {
    let fdinfo = fs::read_to_string(format!("/proc/self/fdinfo/{}", fd.as_raw_fd()))?;
    Ok(fdinfo.lines().any(|l| l.starts_with("link_type:")))
}

/// Look up the BTF id of a kernel function (or LSM hook, or raw tracepoint)
/// in vmlinux, for a given attach type. libbpf takes care of the naming
/// prefixes (bpf_lsm_, btf_trace_).
pub(crate) fn vmlinux_btf_id(name: &str, attach_type: u32) -> io::Result<u32> {
    let name =
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: name is a valid NUL terminated string.
    let id = unsafe {
        libbpf_sys::libbpf_find_vmlinux_btf_id(
            name.as_ptr(),
            attach_type as libbpf_sys::bpf_attach_type,
        )
    };
    Ok(libbpf_result(id)? as u32)
}

/// Look up the BTF id of a function in the BTF object `btf_id` (usually the
/// one of a loaded program).
pub(crate) fn btf_func_id(btf_id: u32, name: &str) -> io::Result<u32> {
    let name =
        CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: the returned pointer is checked and freed below.
    let btf = unsafe { libbpf_sys::btf__load_from_kernel_by_id(btf_id) };
    if btf.is_null() {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: btf is valid until freed, name is NUL terminated.
    let id = unsafe {
        let id = libbpf_sys::btf__find_by_name_kind(
            btf,
            name.as_ptr(),
            libbpf_sys::BTF_KIND_FUNC as u32,
        );
        libbpf_sys::btf__free(btf);
        id
    };
    Ok(libbpf_result(id)? as u32)
}

/// BPF_BTF_LOAD. On failure the kernel log is returned alongside the error.
pub(crate) fn btf_load(data: &[u8]) -> Result<OwnedFd, (io::Error, String)> {
    let mut log = vec![0u8; 64 * 1024];
    // log_level 0 with a buffer: libbpf retries with the log enabled on
    // failure only.
    let mut opts = libbpf_sys::bpf_btf_load_opts {
        sz: mem::size_of::<libbpf_sys::bpf_btf_load_opts>() as libbpf_sys::size_t,
        log_buf: log.as_mut_ptr() as *mut libc::c_char,
        log_size: log.len() as u32,
        ..Default::default()
    };

    // SAFETY: data and log outlive the call.
    let ret = unsafe {
        libbpf_sys::bpf_btf_load(
            data.as_ptr() as *const c_void,
            data.len() as libbpf_sys::size_t,
            &mut opts,
        )
    };
    libbpf_fd(ret).map_err(|e| (e, c_log_to_string(&log)))
}

/// Parameters of a BPF_PROG_LOAD call.
pub(crate) struct ProgLoad<'a> {
    pub(crate) prog_type: u32,
    pub(crate) name: &'a CStr,
    pub(crate) license: &'a CStr,
    pub(crate) insns: &'a [Insn],
    pub(crate) expected_attach_type: u32,
    pub(crate) attach_btf_id: u32,
    pub(crate) attach_prog_fd: Option<BorrowedFd<'a>>,
    pub(crate) btf_fd: Option<BorrowedFd<'a>>,
    // (insn_off, type_id) pairs, layout of struct bpf_func_info.
    pub(crate) func_info: &'a [[u32; 2]],
}

/// BPF_PROG_LOAD, through libbpf so we get its retry logic. On failure the
/// verifier log is returned alongside the error.
pub(crate) fn prog_load(load: &ProgLoad) -> Result<OwnedFd, (io::Error, String)> {
    let mut log = vec![0u8; 256 * 1024];

    let mut opts = libbpf_sys::bpf_prog_load_opts {
        sz: mem::size_of::<libbpf_sys::bpf_prog_load_opts>() as libbpf_sys::size_t,
        expected_attach_type: load.expected_attach_type as libbpf_sys::bpf_attach_type,
        attach_btf_id: load.attach_btf_id,
        attach_prog_fd: load
            .attach_prog_fd
            .map(|fd| fd.as_raw_fd() as u32)
            .unwrap_or(0),
        prog_btf_fd: load.btf_fd.map(|fd| fd.as_raw_fd() as u32).unwrap_or(0),
        // log_level 0 with a buffer: libbpf retries with the log enabled on
        // failure only.
        log_buf: log.as_mut_ptr() as *mut libc::c_char,
        log_size: log.len() as u32,
        ..Default::default()
    };
    if !load.func_info.is_empty() {
        opts.func_info = load.func_info.as_ptr() as *const c_void;
        opts.func_info_cnt = load.func_info.len() as u32;
        opts.func_info_rec_size = mem::size_of::<[u32; 2]>() as u32;
    }

    // SAFETY: all pointers reference data living until the call returns and
    // Insn has the same layout as struct bpf_insn.
    let ret = unsafe {
        libbpf_sys::bpf_prog_load(
            load.prog_type as libbpf_sys::bpf_prog_type,
            load.name.as_ptr(),
            load.license.as_ptr(),
            load.insns.as_ptr() as *const libbpf_sys::bpf_insn,
            load.insns.len() as libbpf_sys::size_t,
            &mut opts,
        )
    };

    libbpf_fd(ret).map_err(|e| (e, c_log_to_string(&log)))
}

fn c_log_to_string(log: &[u8]) -> String {
    let end = log.iter().position(|b| *b == 0).unwrap_or(log.len());
    String::from_utf8_lossy(&log[..end]).trim_end().to_string()
}
