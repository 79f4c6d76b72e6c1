//! Error types of the tracking core.

use drm_fourcc::DrmFourcc;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

/// Type-erased error of a collaborator behind one of the backend seams.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// An error raised while connecting a display to the X server and its
/// rendering device.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// Connecting to the X server failed.
    #[error("connecting to the X server failed")]
    Connect(#[from] ConnectError),

    /// The connection to the X server broke during setup.
    #[error("the connection to the X server broke")]
    Connection(#[from] ConnectionError),

    /// A setup request was rejected by the X server.
    #[error("a setup request was rejected by the X server")]
    Reply(#[from] ReplyError),

    /// Allocating a protocol id failed.
    #[error("allocating a protocol id failed")]
    Id(#[from] ReplyOrIdError),

    /// The server does not advertise a usable screen.
    #[error("the X server does not advertise a usable screen")]
    NoScreen,

    /// A required extension is missing.
    #[error("{0}")]
    MissingExtension(#[from] MissingExtensionError),

    /// The X server did not hand out a usable direct-rendering node.
    #[error("the X server cannot export a direct rendering node")]
    CannotDirectRender,

    /// Creating the rendering device from the exported node failed.
    #[error("creating the rendering device failed")]
    Device(#[source] std::io::Error),
}

/// A required X11 extension is not present on the server.
#[derive(Debug, thiserror::Error)]
#[error("extension {name} (>= {major}.{minor}) is required but not present")]
pub struct MissingExtensionError {
    /// Extension name as advertised by the server.
    pub name: &'static str,
    /// Minimum required major version.
    pub major: u32,
    /// Minimum required minor version.
    pub minor: u32,
}

/// An error raised while building the tracked state for an intercepted
/// window surface.
#[derive(Debug, thiserror::Error)]
pub enum CreateSurfaceError {
    /// Querying the window geometry from the server failed.
    #[error("querying the window geometry failed")]
    Geometry(#[source] AnyError),

    /// The config's pixel format cannot be presented.
    #[error("pixel format {0:?} cannot be presented")]
    UnsupportedFormat(DrmFourcc),

    /// Allocating the buffer ring for the window failed.
    #[error("allocating the buffer ring failed")]
    Ring(#[source] AnyError),

    /// Registering for presentation events failed.
    #[error("registering for presentation events failed")]
    Events(#[source] AnyError),
}

/// An error raised while tracking an intercepted buffer swap.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// The surface handle is not tracked by the display.
    #[error("no surface is tracked for this handle")]
    UnknownSurface,

    /// Locking the next buffer from the ring failed.
    #[error("locking the next buffer from the ring failed")]
    Lock(#[source] AnyError),

    /// Exporting the locked buffer's memory failed.
    #[error("exporting the locked buffer failed")]
    Export(#[from] std::io::Error),

    /// The server rejected the pixmap wrapping the locked buffer.
    #[error("creating a pixmap for the locked buffer failed")]
    CreatePixmap(#[source] AnyError),

    /// Draining the presentation event queue failed.
    #[error("draining the presentation event queue failed")]
    Events(#[source] AnyError),
}
