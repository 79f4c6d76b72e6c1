//! The GBM-backed buffer ring.
//!
//! The ring is the GBM surface the real EGL renders into. Locking the
//! front buffer hands out the buffer object the client just finished
//! drawing; dropping the handle returns it to the ring, which is how idle
//! notifications recycle buffers.

use std::ffi::c_void;
use std::io;
use std::os::fd::OwnedFd;

use drm_fourcc::DrmFourcc;
use gbm::{AsRaw, BufferObject, BufferObjectFlags, Device, Surface};

use crate::backend::{BufferId, BufferRing, RingBuffer};

/// A rotating pool of scanout-capable buffers behind one window.
pub struct GbmRing {
    surface: Surface<()>,
}

impl GbmRing {
    /// Allocates a ring of `width` x `height` buffers usable for rendering
    /// and scanout.
    pub fn new(
        device: &Device<OwnedFd>,
        width: u32,
        height: u32,
        format: DrmFourcc,
    ) -> io::Result<Self> {
        let surface = device.create_surface::<()>(
            width,
            height,
            format,
            BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
        )?;
        Ok(GbmRing { surface })
    }
}

impl BufferRing for GbmRing {
    type Buffer = BufferObject<()>;
    type Error = gbm::FrontBufferError;

    fn lock_front(&mut self) -> Result<Self::Buffer, Self::Error> {
        // SAFETY: the surface is rendered into by the real EGL between swaps,
        // and the shim locks at most one front buffer per swap, which is the
        // contract `lock_front_buffer` requires.
        unsafe { self.surface.lock_front_buffer() }
    }

    // release() keeps the default: dropping the handle returns the buffer
    // object to the GBM surface.

    fn native_window(&self) -> *mut c_void {
        self.surface.as_raw() as *mut c_void
    }
}

impl RingBuffer for SurfaceBufferHandle<()> {
    fn id(&self) -> BufferId {
        BufferId((**self).as_raw() as usize as u64)
    }

    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn stride(&self) -> u32 {
        (**self).stride()
    }

    fn export_fd(&self) -> io::Result<OwnedFd> {
        (**self)
            .fd()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
    }
}

impl std::fmt::Debug for GbmRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbmRing")
            .field("surface", &self.surface.as_raw())
            .finish()
    }
}
