use log::debug;
use once_cell::sync::OnceCell;

use super::kernel_version::{KernelVersion, KernelVersionReq};
use crate::error::LinkError;

static FEATURES: OnceCell<Features> = OnceCell::new();

/// Gets the kernel features, probing them on first use. Kernel support can't
/// change while we run so the result is kept for the process lifetime.
pub fn features() -> Result<&'static Features, LinkError> {
    FEATURES.get_or_try_init(|| {
        let version = KernelVersion::current().map_err(|e| LinkError::Unsupported {
            feature: format!("kernel version detection ({e})"),
        })?;
        let features = Features::from_version(&version);
        debug!("Kernel features: {features:?}");
        Ok(features)
    })
}

/// Link related features of the running kernel.
#[derive(Clone, Debug)]
pub struct Features {
    /// Kernel release, as reported by uname.
    pub kernel: String,
    /// BPF_LINK_CREATE accepts fentry, fexit, fmod_ret and LSM programs.
    pub link_create_tracing: bool,
    /// BPF_LINK_CREATE accepts freplace programs, including an explicit
    /// target.
    pub link_create_freplace: bool,
    /// Tracing links can carry a BPF cookie.
    pub tracing_cookie: bool,
}

impl Features {
    pub(crate) fn from_version(version: &KernelVersion) -> Self {
        // Requirements are constant and known to parse.
        let at_least = |req: &str| {
            KernelVersionReq::parse(req)
                .map(|r| r.matches(version))
                .unwrap_or(false)
        };

        Features {
            kernel: version.full.clone(),
            link_create_tracing: at_least(">= 5.19"),
            link_create_freplace: at_least(">= 5.10"),
            tracing_cookie: at_least(">= 5.19"),
        }
    }
}
