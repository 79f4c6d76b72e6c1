//! The small slice of the EGL ABI the interposer needs to speak.
//!
//! Handles are opaque pointers owned by the real EGL implementation; the
//! shim only ever stores and compares them. Only the entry points that get
//! intercepted and the constants they consume are declared here.

use std::ffi::c_void;

/// 32-bit signed integer of the EGL ABI.
pub type EGLint = i32;
/// Boolean of the EGL ABI; [`EGL_TRUE`] or [`EGL_FALSE`].
pub type EGLBoolean = std::ffi::c_uint;
/// Platform display handle; an X11 `Display*` or a GBM device.
pub type EGLNativeDisplayType = *mut c_void;
/// Platform window handle; an X11 window XID or a GBM surface.
pub type EGLNativeWindowType = *mut c_void;

/// Opaque display handle returned by `eglGetDisplay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct EGLDisplay(pub *mut c_void);

/// Opaque framebuffer configuration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct EGLConfig(pub *mut c_void);

/// Opaque surface handle returned by `eglCreateWindowSurface`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct EGLSurface(pub *mut c_void);

/// Boolean false.
pub const EGL_FALSE: EGLBoolean = 0;
/// Boolean true.
pub const EGL_TRUE: EGLBoolean = 1;
/// Attribute selecting the visual id a config's window must be created with.
pub const EGL_NATIVE_VISUAL_ID: EGLint = 0x302E;
/// The null display handle.
pub const EGL_NO_DISPLAY: EGLDisplay = EGLDisplay(std::ptr::null_mut());
/// The null surface handle.
pub const EGL_NO_SURFACE: EGLSurface = EGLSurface(std::ptr::null_mut());

/// `eglGetDisplay`.
pub type GetDisplayFn = unsafe extern "C" fn(EGLNativeDisplayType) -> EGLDisplay;
/// `eglGetConfigAttrib`.
pub type GetConfigAttribFn =
    unsafe extern "C" fn(EGLDisplay, EGLConfig, EGLint, *mut EGLint) -> EGLBoolean;
/// `eglCreateWindowSurface`.
pub type CreateWindowSurfaceFn =
    unsafe extern "C" fn(EGLDisplay, EGLConfig, EGLNativeWindowType, *const EGLint) -> EGLSurface;
/// `eglSwapBuffers`.
pub type SwapBuffersFn = unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean;
