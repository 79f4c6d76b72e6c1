//! Seams towards the external collaborators of the tracking core.
//!
//! The shim's state machine only ever talks to the display server and the
//! buffer allocator through the traits in this module. [`PresentBackend`]
//! bundles the per-display collaborators (one protocol connection plus one
//! device context), [`BufferRing`] is the rotating pool of device buffers
//! backing one surface. The production implementations live in
//! [`x11`](crate::x11) and [`ring`](crate::ring); tests drive the core
//! through scripted stand-ins instead of a server.

use std::ffi::c_void;
use std::os::fd::OwnedFd;

use drm_fourcc::DrmFourcc;

/// Server-side drawable id (a window or pixmap XID).
pub type Drawable = u32;
/// Server-side pixmap id.
pub type Pixmap = u32;

/// Identity of a device buffer object, stable across re-locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Handle of one presentation event registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQueueId(pub u32);

/// Policy for how presents are scheduled by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentMode {
    /// Present at the next convenient vblank, paced by buffer serial.
    Vsync,
    /// Present as soon as possible, without waiting for a vblank.
    #[default]
    Async,
}

/// A presentation event delivered by the display server.
#[derive(Debug, Clone, Copy)]
pub enum PresentEvent {
    /// A present request finished; timing information only.
    Complete {
        /// Serial of the present request.
        serial: u32,
        /// System time of the completion.
        ust: u64,
        /// Media stream counter at completion.
        msc: u64,
    },
    /// The server is done reading a previously presented pixmap.
    Idle {
        /// The pixmap that became reusable.
        pixmap: Pixmap,
        /// Serial of the present request it was last shown with.
        serial: u32,
    },
    /// The tracked drawable changed size. Size tracking is reserved.
    Configure {
        /// New width in pixels.
        width: u16,
        /// New height in pixels.
        height: u16,
    },
}

/// Description of the memory layout behind a pixmap-creation request.
#[derive(Debug, Clone, Copy)]
pub struct Framebuffer {
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Bytes per row.
    pub stride: u16,
    /// Color depth in bits.
    pub depth: u8,
    /// Bits per pixel of the packed format.
    pub bpp: u8,
}

/// A present-pixmap request as the tracking core issues it.
#[derive(Debug, Clone, Copy)]
pub struct PresentRequest {
    /// Target drawable.
    pub drawable: Drawable,
    /// Pixmap to show.
    pub pixmap: Pixmap,
    /// Request serial, taken from the buffer's serial.
    pub serial: u32,
    /// Pacing divisor (the surface's buffer count).
    pub divisor: u64,
    /// Pacing remainder (the buffer's serial).
    pub remainder: u64,
    /// Scheduling policy.
    pub mode: PresentMode,
}

/// One device buffer object locked out of a [`BufferRing`].
pub trait RingBuffer {
    /// Stable identity of the underlying buffer object.
    fn id(&self) -> BufferId;
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// Bytes per row.
    fn stride(&self) -> u32;
    /// Exports the buffer's memory as a file descriptor the server can map.
    fn export_fd(&self) -> std::io::Result<OwnedFd>;
}

/// The rotating pool of device buffers backing one surface.
pub trait BufferRing {
    /// Buffer handle locked out of the ring.
    type Buffer: RingBuffer;
    /// Error raised by the device layer.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Locks the next renderable buffer. May block inside the device layer
    /// until one is free.
    fn lock_front(&mut self) -> Result<Self::Buffer, Self::Error>;

    /// Returns a locked buffer to the ring.
    fn release(&mut self, buffer: Self::Buffer) {
        drop(buffer);
    }

    /// The native handle the real EGL gets as its window.
    fn native_window(&self) -> *mut c_void;
}

/// Protocol connection and device context of one tracked display.
pub trait PresentBackend {
    /// Ring type allocated for this backend's surfaces.
    type Ring: BufferRing;
    /// Error raised by the connection or device.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The native device handle handed to the real EGL as its display.
    fn native_device(&self) -> *mut c_void;

    /// Queries the current size of a drawable.
    fn geometry(&mut self, drawable: Drawable) -> Result<(u16, u16), Self::Error>;

    /// Looks up a TrueColor visual of the given depth on the screen.
    fn visual_id(&self, depth: u8) -> Option<u32>;

    /// Allocates a buffer ring usable for rendering and scanout.
    fn create_ring(
        &mut self,
        width: u32,
        height: u32,
        format: DrmFourcc,
    ) -> Result<Self::Ring, Self::Error>;

    /// Registers for complete/idle/configure notifications on a drawable.
    fn register_events(&mut self, drawable: Drawable) -> Result<EventQueueId, Self::Error>;

    /// Drops a registration made with [`register_events`](Self::register_events).
    fn unregister_events(&mut self, queue: EventQueueId);

    /// Returns the next already-delivered event of the registration, never
    /// blocking.
    fn poll_event(&mut self, queue: EventQueueId) -> Result<Option<PresentEvent>, Self::Error>;

    /// Blocks until the registration receives an event.
    fn wait_event(&mut self, queue: EventQueueId) -> Result<PresentEvent, Self::Error>;

    /// Wraps shared buffer memory into a server-side pixmap. Ownership of
    /// the descriptor moves to the request; the local end is closed once the
    /// request is sent.
    fn create_pixmap(
        &mut self,
        drawable: Drawable,
        framebuffer: &Framebuffer,
        fd: OwnedFd,
    ) -> Result<Pixmap, Self::Error>;

    /// Releases a pixmap created with [`create_pixmap`](Self::create_pixmap).
    fn free_pixmap(&mut self, pixmap: Pixmap);

    /// Asks the server to present a pixmap.
    fn present_pixmap(&mut self, request: &PresentRequest) -> Result<(), Self::Error>;

    /// Flushes buffered requests to the server.
    fn flush(&mut self);
}

/// Builds one [`PresentBackend`] per intercepted native display.
pub trait Connect {
    /// Backend produced for each display.
    type Backend: PresentBackend;
    /// Error raised while connecting.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens the connection and device context for a native display handle.
    fn connect(&mut self, native: usize) -> Result<Self::Backend, Self::Error>;
}

/// Color depth and bits-per-pixel of the packed formats the shim presents.
pub(crate) fn format_depth_bpp(format: DrmFourcc) -> Option<(u8, u8)> {
    match format {
        DrmFourcc::Argb8888 | DrmFourcc::Abgr8888 => Some((32, 32)),
        DrmFourcc::Xrgb8888 | DrmFourcc::Xbgr8888 => Some((24, 32)),
        DrmFourcc::Rgb565 => Some((16, 16)),
        _ => None,
    }
}
