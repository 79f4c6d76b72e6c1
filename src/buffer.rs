//! Pixmap wrappers around locked device buffers.
//!
//! A [`PixmapBuffer`] ties one device buffer object to the server-side
//! pixmap that exposes its memory. Wrappers are created lazily the first
//! time a buffer is locked for presentation and live as long as the buffer
//! collection of their surface. The wrapper owns the locked ring slot from
//! the moment the buffer is locked until the server signals it idle, so the
//! buffer cannot be handed out again while the server still reads from it.

use tracing::{debug, trace, warn};

use crate::backend::{
    BufferId, Drawable, Framebuffer, Pixmap, PresentBackend, PresentMode, PresentRequest,
    RingBuffer,
};
use crate::error::SwapError;

/// One device buffer exposed to the server as a pixmap.
pub struct PixmapBuffer<Bo: RingBuffer> {
    pixmap: Pixmap,
    serial: u32,
    busy: bool,
    buffer: BufferId,
    slot: Option<Bo>,
}

impl<Bo: RingBuffer> PixmapBuffer<Bo> {
    /// Wraps a locked buffer into a server-side pixmap.
    ///
    /// The buffer's memory is exported and handed to the server by
    /// ownership; the local descriptor is closed once the request went out.
    /// On rejection the locked slot is handed back to the caller and no
    /// wrapper is recorded.
    pub(crate) fn create<B: PresentBackend>(
        backend: &mut B,
        drawable: Drawable,
        depth: u8,
        bpp: u8,
        serial: u32,
        slot: Bo,
    ) -> Result<Self, (Bo, SwapError)> {
        let fd = match slot.export_fd() {
            Ok(fd) => fd,
            Err(err) => {
                warn!("exporting buffer {:?} failed: {err}", slot.id());
                return Err((slot, SwapError::Export(err)));
            }
        };

        let framebuffer = Framebuffer {
            width: slot.width() as u16,
            height: slot.height() as u16,
            stride: slot.stride() as u16,
            depth,
            bpp,
        };

        match backend.create_pixmap(drawable, &framebuffer, fd) {
            Ok(pixmap) => {
                debug!(pixmap, serial, "wrapped buffer {:?} into a pixmap", slot.id());
                Ok(PixmapBuffer {
                    pixmap,
                    serial,
                    busy: false,
                    buffer: slot.id(),
                    slot: Some(slot),
                })
            }
            Err(err) => {
                warn!("create pixmap failed: {err}");
                Err((slot, SwapError::CreatePixmap(err.into())))
            }
        }
    }

    /// Asks the server to show this pixmap on the drawable.
    ///
    /// Presentation is best effort: a rejection is logged and swallowed.
    /// The connection is flushed so the request goes out immediately.
    pub(crate) fn present<B: PresentBackend>(
        &self,
        backend: &mut B,
        drawable: Drawable,
        mode: PresentMode,
        buffer_count: u32,
    ) {
        let request = PresentRequest {
            drawable,
            pixmap: self.pixmap,
            serial: self.serial,
            divisor: u64::from(buffer_count),
            remainder: u64::from(self.serial),
            mode,
        };

        if let Err(err) = backend.present_pixmap(&request) {
            warn!(pixmap = self.pixmap, "present pixmap failed: {err}");
        }
        backend.flush();
        trace!(pixmap = self.pixmap, serial = self.serial, "presented");
    }

    /// The server-side pixmap id.
    pub fn pixmap(&self) -> Pixmap {
        self.pixmap
    }

    /// Serial assigned from the surface's counter at creation.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Whether the pixmap is between present and idle notification.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Identity of the wrapped buffer object.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub(crate) fn mark_busy(&mut self) {
        self.busy = true;
    }

    pub(crate) fn clear_busy(&mut self) {
        self.busy = false;
    }

    /// Stores the freshly locked slot back into its wrapper.
    pub(crate) fn attach(&mut self, slot: Bo) {
        debug_assert_eq!(slot.id(), self.buffer);
        debug_assert!(self.slot.is_none(), "buffer locked twice");
        self.slot = Some(slot);
    }

    /// Takes the locked slot out, if any, so it can go back to the ring.
    pub(crate) fn take_slot(&mut self) -> Option<Bo> {
        self.slot.take()
    }
}

impl<Bo: RingBuffer> std::fmt::Debug for PixmapBuffer<Bo> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixmapBuffer")
            .field("pixmap", &self.pixmap)
            .field("serial", &self.serial)
            .field("busy", &self.busy)
            .field("buffer", &self.buffer)
            .field("locked", &self.slot.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, FakeRing};
    use crate::backend::BufferRing;

    const WINDOW: Drawable = 0x0260_0001;

    #[test]
    fn create_wraps_the_locked_buffer() {
        let mut backend = FakeBackend::new();
        let mut ring = FakeRing::new(2);
        let slot = ring.lock_front().unwrap();

        let buffer = PixmapBuffer::create(&mut backend, WINDOW, 32, 32, 0, slot).unwrap();
        assert!(!buffer.is_busy());
        assert_eq!(buffer.serial(), 0);
        assert_eq!(backend.created.len(), 1);
        assert_eq!(backend.created[0], buffer.pixmap());
    }

    #[test]
    fn rejected_pixmap_returns_the_slot() {
        let mut backend = FakeBackend::new();
        backend.reject_pixmaps = true;
        let mut ring = FakeRing::new(2);
        let slot = ring.lock_front().unwrap();

        let (slot, err) = PixmapBuffer::<_>::create(&mut backend, WINDOW, 32, 32, 0, slot)
            .err()
            .unwrap();
        assert!(matches!(err, SwapError::CreatePixmap(_)));
        assert!(backend.created.is_empty());
        ring.release(slot);
        assert_eq!(ring.locked, 0);
    }

    #[test]
    fn present_is_best_effort() {
        let mut backend = FakeBackend::new();
        backend.reject_presents = true;
        let mut ring = FakeRing::new(2);
        let slot = ring.lock_front().unwrap();
        let buffer = PixmapBuffer::create(&mut backend, WINDOW, 32, 32, 0, slot).unwrap();

        buffer.present(&mut backend, WINDOW, PresentMode::Async, 1);
        assert_eq!(backend.presents.len(), 0);
        assert_eq!(backend.flushes, 1);
    }
}
