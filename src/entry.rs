//! The C ABI surface of the preloaded object.
//!
//! These are the four symbols the dynamic linker resolves in front of the
//! vendor EGL. They forward into one process-wide [`EglShim`] instance;
//! the process boundary forces this single static, everything behind it is
//! owned, explicitly-passed state. All entry points are serialized behind
//! one lock, so the tracking core keeps its single-threaded model no
//! matter how the client threads its EGL calls.

#![allow(non_snake_case)]

use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing::error;

use crate::api::NextEglApi;
use crate::ffi;
use crate::shim::{EglShim, ShimConfig};
use crate::x11::X11Connector;

type ProcessShim = EglShim<NextEglApi, X11Connector>;

struct ShimCell(ProcessShim);

// SAFETY: the raw pointers held inside the shim are opaque handles owned by
// the client process; they are stored and compared, never dereferenced, and
// all access happens under the lock below.
unsafe impl Send for ShimCell {}

static SHIM: Lazy<Mutex<Option<ShimCell>>> = Lazy::new(|| {
    init_logging();
    Mutex::new(init_shim())
});

fn init_logging() {
    // A preloaded shim has no host to install a subscriber; keep quiet
    // unless RUST_LOG asks for output.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn init_shim() -> Option<ShimCell> {
    match NextEglApi::load() {
        Ok(api) => Some(ShimCell(EglShim::new(
            api,
            X11Connector,
            ShimConfig::default(),
        ))),
        Err(err) => {
            error!("resolving the real EGL entry points failed: {err}");
            None
        }
    }
}

fn with_shim<R>(fallback: R, f: impl FnOnce(&mut ProcessShim) -> R) -> R {
    let mut guard = match SHIM.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match guard.as_mut() {
        Some(cell) => f(&mut cell.0),
        None => fallback,
    }
}

/// Intercepted `eglGetDisplay`.
///
/// # Safety
/// Called by client code through the EGL ABI.
#[no_mangle]
pub unsafe extern "C" fn eglGetDisplay(native: ffi::EGLNativeDisplayType) -> ffi::EGLDisplay {
    with_shim(ffi::EGL_NO_DISPLAY, |shim| shim.get_display(native))
}

/// Intercepted `eglGetConfigAttrib`.
///
/// # Safety
/// `value` must be null or point to writable storage for one `EGLint`.
#[no_mangle]
pub unsafe extern "C" fn eglGetConfigAttrib(
    display: ffi::EGLDisplay,
    config: ffi::EGLConfig,
    attribute: ffi::EGLint,
    value: *mut ffi::EGLint,
) -> ffi::EGLBoolean {
    with_shim(ffi::EGL_FALSE, |shim| {
        match shim.get_config_attrib(display, config, attribute) {
            Some(resolved) => {
                if !value.is_null() {
                    unsafe { *value = resolved };
                }
                ffi::EGL_TRUE
            }
            None => ffi::EGL_FALSE,
        }
    })
}

/// Intercepted `eglCreateWindowSurface`.
///
/// # Safety
/// `attribs` must be null or point to an `EGL_NONE`-terminated list; it is
/// forwarded to the real implementation untouched.
#[no_mangle]
pub unsafe extern "C" fn eglCreateWindowSurface(
    display: ffi::EGLDisplay,
    config: ffi::EGLConfig,
    window: ffi::EGLNativeWindowType,
    attribs: *const ffi::EGLint,
) -> ffi::EGLSurface {
    with_shim(ffi::EGL_NO_SURFACE, |shim| {
        shim.create_window_surface(display, config, window, attribs)
    })
}

/// Intercepted `eglSwapBuffers`.
///
/// # Safety
/// Called by client code through the EGL ABI.
#[no_mangle]
pub unsafe extern "C" fn eglSwapBuffers(
    display: ffi::EGLDisplay,
    surface: ffi::EGLSurface,
) -> ffi::EGLBoolean {
    with_shim(ffi::EGL_FALSE, |shim| shim.swap_buffers(display, surface))
}
