//! The real EGL implementation, seen as an injected capability set.
//!
//! The interposition layer never links against EGL directly. It is handed
//! something implementing [`EglApi`], which covers exactly the four entry
//! points the shim intercepts. The production implementation is
//! [`NextEglApi`], which resolves each symbol once through
//! `dlsym(RTLD_NEXT, …)` so the call lands in the vendor library the shim
//! was preloaded in front of.

use std::ffi::{c_void, CString};
use std::mem;

use crate::ffi;

/// The four capabilities of the real EGL implementation the shim delegates to.
///
/// Every intercepted entry point calls through to its counterpart here; the
/// shim augments the calls, it never replaces them.
pub trait EglApi {
    /// `eglGetDisplay`.
    fn get_display(&self, native: ffi::EGLNativeDisplayType) -> ffi::EGLDisplay;

    /// `eglGetConfigAttrib`, returning the attribute value on success.
    fn get_config_attrib(
        &self,
        display: ffi::EGLDisplay,
        config: ffi::EGLConfig,
        attribute: ffi::EGLint,
    ) -> Option<ffi::EGLint>;

    /// `eglCreateWindowSurface`. The attribute list is forwarded untouched.
    fn create_window_surface(
        &self,
        display: ffi::EGLDisplay,
        config: ffi::EGLConfig,
        window: ffi::EGLNativeWindowType,
        attribs: *const ffi::EGLint,
    ) -> ffi::EGLSurface;

    /// `eglSwapBuffers`.
    fn swap_buffers(&self, display: ffi::EGLDisplay, surface: ffi::EGLSurface) -> bool;
}

/// A required EGL symbol could not be found in any object after the shim.
#[derive(Debug, thiserror::Error)]
#[error("symbol {symbol} is not provided by any object after the shim")]
pub struct ResolveError {
    symbol: &'static str,
}

/// [`EglApi`] backed by the next EGL implementation in dynamic-link order.
pub struct NextEglApi {
    get_display: ffi::GetDisplayFn,
    get_config_attrib: ffi::GetConfigAttribFn,
    create_window_surface: ffi::CreateWindowSurfaceFn,
    swap_buffers: ffi::SwapBuffersFn,
}

impl NextEglApi {
    /// Resolves the real entry points. Called once per process; the result
    /// is kept for the process lifetime.
    pub fn load() -> Result<Self, ResolveError> {
        // SAFETY: the resolved addresses come from the dynamic linker and are
        // transmuted to the exact signatures libEGL exports them with.
        unsafe {
            Ok(NextEglApi {
                get_display: mem::transmute::<*mut c_void, ffi::GetDisplayFn>(resolve(
                    "eglGetDisplay",
                )?),
                get_config_attrib: mem::transmute::<*mut c_void, ffi::GetConfigAttribFn>(resolve(
                    "eglGetConfigAttrib",
                )?),
                create_window_surface: mem::transmute::<*mut c_void, ffi::CreateWindowSurfaceFn>(
                    resolve("eglCreateWindowSurface")?,
                ),
                swap_buffers: mem::transmute::<*mut c_void, ffi::SwapBuffersFn>(resolve(
                    "eglSwapBuffers",
                )?),
            })
        }
    }
}

fn resolve(symbol: &'static str) -> Result<*mut c_void, ResolveError> {
    let name = CString::new(symbol).map_err(|_| ResolveError { symbol })?;
    // SAFETY: dlsym gets a valid nul-terminated name and only consults the
    // link map.
    let address = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    if address.is_null() {
        Err(ResolveError { symbol })
    } else {
        Ok(address)
    }
}

impl EglApi for NextEglApi {
    fn get_display(&self, native: ffi::EGLNativeDisplayType) -> ffi::EGLDisplay {
        unsafe { (self.get_display)(native) }
    }

    fn get_config_attrib(
        &self,
        display: ffi::EGLDisplay,
        config: ffi::EGLConfig,
        attribute: ffi::EGLint,
    ) -> Option<ffi::EGLint> {
        let mut value = 0;
        let ok = unsafe { (self.get_config_attrib)(display, config, attribute, &mut value) };
        (ok == ffi::EGL_TRUE).then_some(value)
    }

    fn create_window_surface(
        &self,
        display: ffi::EGLDisplay,
        config: ffi::EGLConfig,
        window: ffi::EGLNativeWindowType,
        attribs: *const ffi::EGLint,
    ) -> ffi::EGLSurface {
        unsafe { (self.create_window_surface)(display, config, window, attribs) }
    }

    fn swap_buffers(&self, display: ffi::EGLDisplay, surface: ffi::EGLSurface) -> bool {
        (unsafe { (self.swap_buffers)(display, surface) }) == ffi::EGL_TRUE
    }
}

impl std::fmt::Debug for NextEglApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextEglApi").finish_non_exhaustive()
    }
}
