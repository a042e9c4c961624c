//! Owned descriptors
//!
//! Fence descriptors handed out by the device are wrapped in [`FdGuard`] so
//! they are closed on every exit path.

use crate::traits::DisplayDevice;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Descriptor closed through its device on drop
pub struct FdGuard {
    fd: i32,
    device: Option<Arc<dyn DisplayDevice>>,
}

impl FdGuard {
    /// Take ownership of `fd`
    pub fn new(fd: i32, device: Arc<dyn DisplayDevice>) -> Self {
        FdGuard {
            fd,
            device: Some(device),
        }
    }

    /// Raw descriptor
    pub fn fd(&self) -> i32 {
        self.fd
    }

    /// Give up ownership without closing
    pub fn into_raw(mut self) -> i32 {
        self.device = None;
        self.fd
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            if let Err(e) = device.close_fd(self.fd) {
                debug!(target: "kmsprobe::device", fd = self.fd, error = %e, "close failed");
            }
        }
    }
}

impl fmt::Debug for FdGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FdGuard").field(&self.fd).finish()
    }
}
