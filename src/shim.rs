//! The interposition layer.
//!
//! [`EglShim`] owns the display registry and the two injected
//! collaborators: the real EGL implementation ([`EglApi`]) and the
//! connector building one backend per intercepted display. Exactly four
//! entry points are intercepted, and every one of them calls through to the
//! real implementation; the shim augments the calls, it never replaces
//! them.

use drm_fourcc::DrmFourcc;
use tracing::{debug, error, warn};

use crate::api::EglApi;
use crate::backend::{format_depth_bpp, Connect, Drawable, PresentBackend, PresentMode};
use crate::display::DisplayRegistry;
use crate::error::SwapError;
use crate::ffi;

/// Tunables of the interposition layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShimConfig {
    /// How presents are scheduled by the server.
    pub present_mode: PresentMode,
}

/// The interposition layer driving the tracking core around the four
/// intercepted EGL entry points.
pub struct EglShim<A: EglApi, C: Connect> {
    api: A,
    connector: C,
    registry: DisplayRegistry<C::Backend>,
    config: ShimConfig,
}

impl<A: EglApi, C: Connect> EglShim<A, C> {
    /// Builds the shim around the injected real implementation and
    /// connector.
    pub fn new(api: A, connector: C, config: ShimConfig) -> Self {
        EglShim {
            api,
            connector,
            registry: DisplayRegistry::new(),
            config,
        }
    }

    /// The tracked displays.
    pub fn registry(&self) -> &DisplayRegistry<C::Backend> {
        &self.registry
    }

    /// Intercepted `eglGetDisplay`.
    ///
    /// Connects (or reuses) the tracked display for the native handle and
    /// hands the real implementation the rendering device as its native
    /// display, so the vendor EGL runs on its device platform while the
    /// client keeps talking to the windowing server.
    pub fn get_display(&mut self, native: ffi::EGLNativeDisplayType) -> ffi::EGLDisplay {
        let key = native as usize;
        let id = match self.registry.find_by_native_mut(key) {
            Some(display) => display.id(),
            None => match self.registry.create(&mut self.connector, key) {
                Ok(id) => id,
                Err(err) => {
                    error!("connecting a display for {key:#x} failed: {err}");
                    return ffi::EGL_NO_DISPLAY;
                }
            },
        };

        let device = self
            .registry
            .get_mut(id)
            .expect("display registered above")
            .native_device();
        let egl_display = self.api.get_display(device);
        if egl_display == ffi::EGL_NO_DISPLAY {
            warn!("real display creation failed, dropping the tracked display");
            self.registry.remove(id);
            return ffi::EGL_NO_DISPLAY;
        }

        self.registry
            .get_mut(id)
            .expect("display registered above")
            .set_egl_display(egl_display);
        egl_display
    }

    /// Intercepted `eglGetConfigAttrib`.
    ///
    /// Every attribute passes through untouched except the native visual
    /// id, which is translated from the config's internal pixel format to a
    /// TrueColor visual of matching depth so the client can create its
    /// window with it.
    pub fn get_config_attrib(
        &mut self,
        display: ffi::EGLDisplay,
        config: ffi::EGLConfig,
        attribute: ffi::EGLint,
    ) -> Option<ffi::EGLint> {
        if attribute != ffi::EGL_NATIVE_VISUAL_ID {
            return self.api.get_config_attrib(display, config, attribute);
        }

        let raw = self
            .api
            .get_config_attrib(display, config, ffi::EGL_NATIVE_VISUAL_ID)?;
        let depth = match DrmFourcc::try_from(raw as u32) {
            Ok(format) => format_depth_bpp(format).map(|(depth, _)| depth).unwrap_or(32),
            Err(_) => {
                debug!("config reports a non-fourcc native format {raw:#x}");
                32
            }
        };

        let Some(tracked) = self.registry.find(display) else {
            debug!("config attribute query for an untracked display");
            return Some(raw);
        };
        match tracked.backend().visual_id(depth) {
            Some(visual) => Some(visual as ffi::EGLint),
            None => {
                warn!(depth, "no TrueColor visual matches the config");
                None
            }
        }
    }

    /// Intercepted `eglCreateWindowSurface`.
    ///
    /// Builds the tracked surface state for the client's window and hands
    /// the real implementation the ring's native surface instead of the
    /// window. The tracked state only sticks if the real call succeeds.
    pub fn create_window_surface(
        &mut self,
        display: ffi::EGLDisplay,
        config: ffi::EGLConfig,
        window: ffi::EGLNativeWindowType,
        attribs: *const ffi::EGLint,
    ) -> ffi::EGLSurface {
        let Some(id) = self.registry.find(display).map(|tracked| tracked.id()) else {
            debug!("surface creation on an untracked display, passing through");
            return self.api.create_window_surface(display, config, window, attribs);
        };

        let format = self
            .api
            .get_config_attrib(display, config, ffi::EGL_NATIVE_VISUAL_ID)
            .and_then(|raw| DrmFourcc::try_from(raw as u32).ok())
            .unwrap_or(DrmFourcc::Argb8888);
        let drawable = window as Drawable;

        let tracked = self
            .registry
            .get_mut(id)
            .expect("display id just looked up");
        let mut surface = match tracked.create_surface(drawable, format, self.config.present_mode)
        {
            Ok(surface) => surface,
            Err(err) => {
                error!(drawable, "tracking the new surface failed: {err}");
                return ffi::EGL_NO_SURFACE;
            }
        };

        let egl_surface =
            self.api
                .create_window_surface(display, config, surface.native_window(), attribs);
        if egl_surface == ffi::EGL_NO_SURFACE {
            warn!(drawable, "real surface creation failed, releasing tracked state");
            tracked.release_surface(surface);
            return ffi::EGL_NO_SURFACE;
        }

        surface.set_egl_surface(egl_surface);
        tracked.adopt_surface(surface);
        egl_surface
    }

    /// Intercepted `eglSwapBuffers`.
    ///
    /// The real swap runs first; when it fails nothing tracked is touched.
    /// Afterwards the surface's state machine locks, wraps and presents the
    /// rendered buffer.
    pub fn swap_buffers(
        &mut self,
        display: ffi::EGLDisplay,
        surface: ffi::EGLSurface,
    ) -> ffi::EGLBoolean {
        if !self.api.swap_buffers(display, surface) {
            return ffi::EGL_FALSE;
        }

        let Some(tracked) = self.registry.find_mut(display) else {
            debug!("buffer swap on an untracked display");
            return ffi::EGL_TRUE;
        };
        match tracked.swap_buffers(surface) {
            Ok(()) => ffi::EGL_TRUE,
            Err(SwapError::UnknownSurface) => {
                debug!("buffer swap on an untracked surface");
                ffi::EGL_TRUE
            }
            Err(err) => {
                error!("presenting the swapped buffer failed: {err}");
                ffi::EGL_FALSE
            }
        }
    }
}

impl<A: EglApi, C: Connect> std::fmt::Debug for EglShim<A, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EglShim")
            .field("config", &self.config)
            .field("displays", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{handle, FakeApi, FakeConnector};

    const NATIVE: usize = 0x7f00_0000_1000;
    const WINDOW: usize = 0x0260_0001;

    fn shim(api: FakeApi) -> EglShim<FakeApi, FakeConnector> {
        EglShim::new(api, FakeConnector::default(), ShimConfig::default())
    }

    fn fourcc(format: DrmFourcc) -> ffi::EGLint {
        format as u32 as ffi::EGLint
    }

    #[test]
    fn get_display_registers_once_per_native_handle() {
        let mut shim = shim(FakeApi::new(handle(7)));

        let first = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);
        let second = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);

        assert_eq!(first, ffi::EGLDisplay(handle(7)));
        assert_eq!(first, second);
        assert_eq!(shim.registry().len(), 1);
        assert!(shim.registry().find(first).is_some());
    }

    #[test]
    fn failed_real_display_is_not_tracked() {
        let mut shim = shim(FakeApi::new(std::ptr::null_mut()));

        let display = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);

        assert_eq!(display, ffi::EGL_NO_DISPLAY);
        assert!(shim.registry().is_empty());
    }

    #[test]
    fn config_attribs_pass_through() {
        let mut api = FakeApi::new(handle(7));
        api.set_attrib(0x3024, 8);
        let mut shim = shim(api);
        let display = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);

        let value = shim.get_config_attrib(display, ffi::EGLConfig(handle(1)), 0x3024);
        assert_eq!(value, Some(8));
    }

    #[test]
    fn native_visual_id_is_translated() {
        let mut api = FakeApi::new(handle(7));
        api.set_attrib(ffi::EGL_NATIVE_VISUAL_ID, fourcc(DrmFourcc::Argb8888));
        let mut shim = shim(api);
        let display = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);

        let value = shim.get_config_attrib(display, ffi::EGLConfig(handle(1)), ffi::EGL_NATIVE_VISUAL_ID);
        // The fake backend advertises visual 0x21 for every depth.
        assert_eq!(value, Some(0x21));
    }

    #[test]
    fn window_surface_swaps_in_the_ring() {
        let mut api = FakeApi::new(handle(7));
        api.set_attrib(ffi::EGL_NATIVE_VISUAL_ID, fourcc(DrmFourcc::Argb8888));
        let mut shim = shim(api);
        let display = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);

        let surface = shim.create_window_surface(
            display,
            ffi::EGLConfig(handle(1)),
            WINDOW as ffi::EGLNativeWindowType,
            std::ptr::null(),
        );

        assert_ne!(surface, ffi::EGL_NO_SURFACE);
        let tracked = shim.registry().find(display).unwrap();
        assert_eq!(tracked.surfaces().len(), 1);
        assert_eq!(tracked.surfaces()[0].egl_surface(), Some(surface));
        assert_eq!(tracked.surfaces()[0].drawable(), WINDOW as u32);
        // The real implementation saw the ring's native surface, not the window.
        assert_eq!(shim.api.windows_seen(), vec![std::ptr::null_mut()]);
    }

    #[test]
    fn failed_real_surface_releases_tracked_state() {
        let mut api = FakeApi::new(handle(7));
        api.set_attrib(ffi::EGL_NATIVE_VISUAL_ID, fourcc(DrmFourcc::Argb8888));
        api.fail_surfaces = true;
        let mut shim = shim(api);
        let display = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);

        let surface = shim.create_window_surface(
            display,
            ffi::EGLConfig(handle(1)),
            WINDOW as ffi::EGLNativeWindowType,
            std::ptr::null(),
        );

        assert_eq!(surface, ffi::EGL_NO_SURFACE);
        let tracked = shim.registry().find(display).unwrap();
        assert!(tracked.surfaces().is_empty());
        assert!(tracked.backend().queues.is_empty());
        // No pixmap existed yet, so nothing had to be freed.
        assert!(tracked.backend().freed.is_empty());
    }

    #[test]
    fn swap_failure_of_the_real_implementation_propagates() {
        let mut api = FakeApi::new(handle(7));
        api.set_attrib(ffi::EGL_NATIVE_VISUAL_ID, fourcc(DrmFourcc::Argb8888));
        api.fail_swaps = true;
        let mut shim = shim(api);
        let display = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);
        let surface = shim.create_window_surface(
            display,
            ffi::EGLConfig(handle(1)),
            WINDOW as ffi::EGLNativeWindowType,
            std::ptr::null(),
        );

        let result = shim.swap_buffers(display, surface);

        assert_eq!(result, ffi::EGL_FALSE);
        // The real swap was attempted, but the tracked state was not touched.
        assert_eq!(shim.api.swaps.borrow().len(), 1);
        let tracked = shim.registry().find(display).unwrap();
        assert_eq!(tracked.surfaces()[0].outstanding(), 0);
        assert!(tracked.backend().presents.is_empty());
    }

    #[test]
    fn swap_drives_the_state_machine() {
        let mut api = FakeApi::new(handle(7));
        api.set_attrib(ffi::EGL_NATIVE_VISUAL_ID, fourcc(DrmFourcc::Argb8888));
        let mut shim = shim(api);
        let display = shim.get_display(NATIVE as ffi::EGLNativeDisplayType);
        let surface = shim.create_window_surface(
            display,
            ffi::EGLConfig(handle(1)),
            WINDOW as ffi::EGLNativeWindowType,
            std::ptr::null(),
        );

        let result = shim.swap_buffers(display, surface);

        assert_eq!(result, ffi::EGL_TRUE);
        let tracked = shim.registry().find(display).unwrap();
        assert_eq!(tracked.backend().presents.len(), 2);
        assert_eq!(tracked.surfaces()[0].outstanding(), 1);
    }
}
