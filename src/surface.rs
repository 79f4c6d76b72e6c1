//! Tracking of one intercepted window surface.
//!
//! A [`ShimSurface`] owns the buffer ring rendered into by the real EGL,
//! the presentation event queue of its window and the collection of pixmap
//! wrappers created so far. Its [`swap_buffers`](ShimSurface::swap_buffers)
//! is the heart of the shim: after the real swap finished, the freshly
//! rendered buffer is locked, wrapped, presented, and the client is
//! throttled against the server's idle notifications so that no more than
//! one presented buffer is ever in flight beyond the one just locked.

use drm_fourcc::DrmFourcc;
use tracing::trace;

use crate::backend::{
    BufferId, BufferRing, Drawable, PresentBackend, PresentEvent, PresentMode, RingBuffer,
};
use crate::buffer::PixmapBuffer;
use crate::error::SwapError;
use crate::event::PresentEventQueue;
use crate::ffi;

/// One intercepted window, its buffer ring and its presentation state.
pub struct ShimSurface<B: PresentBackend> {
    egl_surface: Option<ffi::EGLSurface>,
    drawable: Drawable,
    format: DrmFourcc,
    depth: u8,
    bpp: u8,
    mode: PresentMode,
    // Wrappers hold locked ring slots, so they go before the ring.
    buffers: Vec<PixmapBuffer<<B::Ring as BufferRing>::Buffer>>,
    ring: B::Ring,
    queue: PresentEventQueue,
    next_serial: u32,
    outstanding: u32,
    primed: bool,
}

impl<B: PresentBackend> ShimSurface<B> {
    pub(crate) fn new(
        drawable: Drawable,
        ring: B::Ring,
        queue: PresentEventQueue,
        format: DrmFourcc,
        depth: u8,
        bpp: u8,
        mode: PresentMode,
    ) -> Self {
        ShimSurface {
            egl_surface: None,
            drawable,
            format,
            depth,
            bpp,
            mode,
            buffers: Vec::new(),
            ring,
            queue,
            next_serial: 0,
            outstanding: 0,
            primed: false,
        }
    }

    /// The opaque handle the client got from the real implementation, once
    /// the surface has been adopted.
    pub fn egl_surface(&self) -> Option<ffi::EGLSurface> {
        self.egl_surface
    }

    pub(crate) fn set_egl_surface(&mut self, surface: ffi::EGLSurface) {
        self.egl_surface = Some(surface);
    }

    /// The window the surface presents to.
    pub fn drawable(&self) -> Drawable {
        self.drawable
    }

    /// The pixel format of the buffer ring.
    pub fn format(&self) -> DrmFourcc {
        self.format
    }

    /// The native handle the real EGL renders into.
    pub fn native_window(&self) -> *mut std::ffi::c_void {
        self.ring.native_window()
    }

    /// Number of buffers currently locked out of the ring.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub(crate) fn buffers(&self) -> &[PixmapBuffer<<B::Ring as BufferRing>::Buffer>] {
        &self.buffers
    }

    #[cfg(test)]
    pub(crate) fn ring(&self) -> &B::Ring {
        &self.ring
    }

    /// Tracks one intercepted buffer swap after the real swap succeeded.
    ///
    /// Locks the buffer the client just rendered, throttles against idle
    /// notifications until at most one other buffer is in flight, wraps the
    /// buffer into a pixmap if it has none yet and presents it. The very
    /// first swap of a surface additionally primes the pipeline with a
    /// present-and-wait so the throttle has a buffer in flight to account
    /// against from the second swap onwards.
    #[profiling::function]
    pub fn swap_buffers(&mut self, backend: &mut B) -> Result<(), SwapError> {
        let slot = self
            .ring
            .lock_front()
            .map_err(|err| SwapError::Lock(err.into()))?;
        self.outstanding += 1;

        if self.primed {
            self.pump_events(backend)?;
            while self.outstanding > 1 {
                self.await_event(backend)?;
            }
        }

        let index = match self.buffer_index(slot.id()) {
            Some(index) => {
                self.buffers[index].attach(slot);
                index
            }
            None => {
                let serial = self.next_serial;
                match PixmapBuffer::create(backend, self.drawable, self.depth, self.bpp, serial, slot)
                {
                    Ok(buffer) => {
                        self.next_serial += 1;
                        self.buffers.push(buffer);
                        self.buffers.len() - 1
                    }
                    Err((slot, err)) => {
                        self.outstanding -= 1;
                        self.ring.release(slot);
                        return Err(err);
                    }
                }
            }
        };

        assert!(
            !self.buffers[index].is_busy(),
            "locked buffer {:?} is still presented",
            self.buffers[index].buffer()
        );

        if !self.primed {
            self.primed = true;
            self.buffers[index].present(backend, self.drawable, self.mode, self.next_serial);
            self.await_event(backend)?;
        }

        self.buffers[index].mark_busy();
        self.buffers[index].present(backend, self.drawable, self.mode, self.next_serial);
        Ok(())
    }

    /// Processes already-delivered events without blocking.
    fn pump_events(&mut self, backend: &mut B) -> Result<(), SwapError> {
        let events = self
            .queue
            .poll(backend)
            .map_err(|err| SwapError::Events(err.into()))?;
        for event in events {
            self.handle_event(event);
        }
        Ok(())
    }

    /// Blocks for at least one event, then processes everything delivered.
    fn await_event(&mut self, backend: &mut B) -> Result<(), SwapError> {
        let events = self
            .queue
            .wait(backend)
            .map_err(|err| SwapError::Events(err.into()))?;
        for event in events {
            self.handle_event(event);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: PresentEvent) {
        match event {
            PresentEvent::Complete { serial, ust, msc } => {
                trace!(serial, ust, msc, "present completed");
            }
            PresentEvent::Idle { pixmap, .. } => {
                let buffer = self
                    .buffers
                    .iter_mut()
                    .find(|buffer| buffer.pixmap() == pixmap)
                    .unwrap_or_else(|| panic!("idle notification for untracked pixmap {pixmap}"));
                buffer.clear_busy();
                if let Some(slot) = buffer.take_slot() {
                    self.ring.release(slot);
                }
                self.outstanding = self
                    .outstanding
                    .checked_sub(1)
                    .expect("idle notification without an outstanding buffer");
            }
            // Size changes and redirection are not tracked.
            PresentEvent::Configure { .. } => {}
        }
    }

    fn buffer_index(&self, id: BufferId) -> Option<usize> {
        self.buffers.iter().position(|buffer| buffer.buffer() == id)
    }

    /// Tears the surface down: pixmaps are freed, locked slots go back to
    /// the ring and the event registration is dropped. Used when the real
    /// surface creation ultimately fails.
    pub(crate) fn release(mut self, backend: &mut B) {
        for mut buffer in self.buffers.drain(..) {
            backend.free_pixmap(buffer.pixmap());
            if let Some(slot) = buffer.take_slot() {
                self.ring.release(slot);
            }
        }
        self.queue.release(backend);
    }
}

impl<B: PresentBackend> std::fmt::Debug for ShimSurface<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimSurface")
            .field("egl_surface", &self.egl_surface)
            .field("drawable", &self.drawable)
            .field("format", &self.format)
            .field("buffers", &self.buffers)
            .field("outstanding", &self.outstanding)
            .field("primed", &self.primed)
            .finish_non_exhaustive()
    }
}
