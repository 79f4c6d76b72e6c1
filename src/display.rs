//! Tracking of intercepted displays and the process-wide registry.
//!
//! A [`ShimDisplay`] pairs the backend of one native display (protocol
//! connection plus rendering device) with the surfaces created under it.
//! Displays live in a [`DisplayRegistry`], an owned arena handed through
//! the interposition layer instead of hidden global state. Lookups are
//! linear scans; a process tracks a handful of displays at most.

use drm_fourcc::DrmFourcc;
use tracing::{debug, error, info};

use crate::backend::{format_depth_bpp, Connect, Drawable, PresentBackend, PresentMode};
use crate::error::{CreateSurfaceError, SwapError};
use crate::event::PresentEventQueue;
use crate::ffi;
use crate::surface::ShimSurface;

/// Registry handle of one tracked display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayId(u32);

/// One intercepted display connection and the surfaces created under it.
pub struct ShimDisplay<B: PresentBackend> {
    id: DisplayId,
    native: usize,
    egl_display: Option<ffi::EGLDisplay>,
    backend: B,
    surfaces: Vec<ShimSurface<B>>,
}

impl<B: PresentBackend> ShimDisplay<B> {
    /// The registry handle of this display.
    pub fn id(&self) -> DisplayId {
        self.id
    }

    /// The native display handle value this display was created for.
    pub fn native(&self) -> usize {
        self.native
    }

    /// The opaque handle the client received, once the real call succeeded.
    pub fn egl_display(&self) -> Option<ffi::EGLDisplay> {
        self.egl_display
    }

    pub(crate) fn set_egl_display(&mut self, display: ffi::EGLDisplay) {
        self.egl_display = Some(display);
    }

    /// The backend serving this display.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The native device handle handed to the real EGL.
    pub fn native_device(&self) -> *mut std::ffi::c_void {
        self.backend.native_device()
    }

    /// The surfaces adopted under this display.
    pub fn surfaces(&self) -> &[ShimSurface<B>] {
        &self.surfaces
    }

    /// Builds the tracked state for a window: a buffer ring sized to the
    /// window's current geometry and an event queue watching it.
    ///
    /// The surface is handed back to the caller and joins the display only
    /// through [`adopt_surface`](Self::adopt_surface) once the real surface
    /// creation succeeded.
    pub fn create_surface(
        &mut self,
        window: Drawable,
        format: DrmFourcc,
        mode: PresentMode,
    ) -> Result<ShimSurface<B>, CreateSurfaceError> {
        let (width, height) = self
            .backend
            .geometry(window)
            .map_err(|err| CreateSurfaceError::Geometry(err.into()))?;
        let (depth, bpp) =
            format_depth_bpp(format).ok_or(CreateSurfaceError::UnsupportedFormat(format))?;

        let ring = self
            .backend
            .create_ring(u32::from(width), u32::from(height), format)
            .map_err(|err| {
                error!(window, "unable to create the buffer ring: {err}");
                CreateSurfaceError::Ring(err.into())
            })?;

        let queue = PresentEventQueue::init(&mut self.backend, window)
            .map_err(|err| CreateSurfaceError::Events(err.into()))?;

        debug!(window, width, height, ?format, "created surface state");
        Ok(ShimSurface::new(window, ring, queue, format, depth, bpp, mode))
    }

    /// Adopts a surface whose real counterpart was created successfully.
    pub fn adopt_surface(&mut self, surface: ShimSurface<B>) {
        self.surfaces.push(surface);
    }

    /// Releases a surface whose real counterpart never materialized.
    pub fn release_surface(&mut self, surface: ShimSurface<B>) {
        surface.release(&mut self.backend);
    }

    /// Finds an adopted surface by the handle the client uses.
    pub fn find_surface(&self, egl_surface: ffi::EGLSurface) -> Option<&ShimSurface<B>> {
        self.surfaces
            .iter()
            .find(|surface| surface.egl_surface() == Some(egl_surface))
    }

    /// Drives the swap state machine of the surface behind `egl_surface`.
    pub fn swap_buffers(&mut self, egl_surface: ffi::EGLSurface) -> Result<(), SwapError> {
        let backend = &mut self.backend;
        let surface = self
            .surfaces
            .iter_mut()
            .find(|surface| surface.egl_surface() == Some(egl_surface))
            .ok_or(SwapError::UnknownSurface)?;
        surface.swap_buffers(backend)
    }
}

impl<B: PresentBackend> std::fmt::Debug for ShimDisplay<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimDisplay")
            .field("id", &self.id)
            .field("native", &format_args!("{:#x}", self.native))
            .field("egl_display", &self.egl_display)
            .field("surfaces", &self.surfaces)
            .finish_non_exhaustive()
    }
}

/// Owned arena of every display the process has intercepted.
#[derive(Debug)]
pub struct DisplayRegistry<B: PresentBackend> {
    next_id: u32,
    displays: Vec<ShimDisplay<B>>,
}

impl<B: PresentBackend> Default for DisplayRegistry<B> {
    fn default() -> Self {
        DisplayRegistry::new()
    }
}

impl<B: PresentBackend> DisplayRegistry<B> {
    /// An empty registry.
    pub fn new() -> Self {
        DisplayRegistry {
            next_id: 0,
            displays: Vec::new(),
        }
    }

    /// Connects the backend for a native display handle and registers the
    /// display. Nothing is registered when the connection fails.
    pub fn create<C>(&mut self, connector: &mut C, native: usize) -> Result<DisplayId, C::Error>
    where
        C: Connect<Backend = B>,
    {
        let backend = connector.connect(native)?;
        let id = DisplayId(self.next_id);
        self.next_id += 1;
        info!(?id, "tracking display for native handle {native:#x}");
        self.displays.push(ShimDisplay {
            id,
            native,
            egl_display: None,
            backend,
            surfaces: Vec::new(),
        });
        Ok(id)
    }

    /// Looks a display up by registry handle.
    pub fn get_mut(&mut self, id: DisplayId) -> Option<&mut ShimDisplay<B>> {
        self.displays.iter_mut().find(|display| display.id == id)
    }

    /// Looks a display up by the opaque handle the client uses.
    pub fn find(&self, egl_display: ffi::EGLDisplay) -> Option<&ShimDisplay<B>> {
        self.displays
            .iter()
            .find(|display| display.egl_display == Some(egl_display))
    }

    /// Mutable variant of [`find`](Self::find).
    pub fn find_mut(&mut self, egl_display: ffi::EGLDisplay) -> Option<&mut ShimDisplay<B>> {
        self.displays
            .iter_mut()
            .find(|display| display.egl_display == Some(egl_display))
    }

    /// Looks a display up by the native handle it was created for.
    pub fn find_by_native_mut(&mut self, native: usize) -> Option<&mut ShimDisplay<B>> {
        self.displays
            .iter_mut()
            .find(|display| display.native == native)
    }

    /// Unregisters a display. Only exercised when initialization of the
    /// real display fails after the backend was already connected.
    pub fn remove(&mut self, id: DisplayId) {
        self.displays.retain(|display| display.id != id);
    }

    /// Number of tracked displays.
    pub fn len(&self) -> usize {
        self.displays.len()
    }

    /// Whether no display is tracked.
    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }
}
