#![warn(missing_docs)]
// Allow acronyms like EGL
#![allow(clippy::upper_case_acronyms)]

//! # egl-present-shim
//!
//! An `LD_PRELOAD` interposer that lets an X11/EGL client run on an EGL
//! implementation that only knows how to render into GBM buffers. The shim
//! intercepts four EGL entry points, hands the vendor library a GBM device
//! and GBM surfaces to render into, and presents the rendered buffers to
//! the client's window itself through the DRI3 and Present extensions.
//!
//! ## How a frame travels
//!
//! - `eglGetDisplay` connects a [`ShimDisplay`](display::ShimDisplay):
//!   one X connection, a DRI3-negotiated GBM device, and the surfaces
//!   created under it, all registered in an owned
//!   [`DisplayRegistry`](display::DisplayRegistry).
//! - `eglCreateWindowSurface` sizes a buffer ring to the client's window,
//!   registers a presentation event queue for it and gives the real EGL the
//!   ring to render into.
//! - `eglSwapBuffers` delegates to the real swap, locks the buffer the
//!   client just rendered, lazily wraps it into a DRI3 pixmap and presents
//!   it. The client is throttled against idle notifications so at most one
//!   presented buffer is in flight beyond the one just locked; reuse of a
//!   buffer the server still reads from is impossible by construction.
//!
//! The tracking core talks to the display server and the buffer allocator
//! only through the seams in [`backend`], which is what keeps the state
//! machine testable without an X server; the production implementations
//! are [`x11::X11Backend`] and [`ring::GbmRing`].
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]. When built as the preloaded
//! `cdylib`, a subscriber honoring `RUST_LOG` is installed on first use.

pub mod api;
pub mod backend;
pub mod buffer;
pub mod display;
pub mod entry;
pub mod error;
pub mod event;
pub mod ffi;
pub mod ring;
pub mod shim;
pub mod surface;
pub mod x11;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{EglApi, NextEglApi};
pub use backend::{BufferRing, Connect, PresentBackend, PresentMode, RingBuffer};
pub use display::{DisplayRegistry, ShimDisplay};
pub use error::{CreateSurfaceError, SetupError, SwapError};
pub use shim::{EglShim, ShimConfig};
pub use surface::ShimSurface;
