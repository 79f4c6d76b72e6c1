//! The production backend: XCB connection, DRI3 device negotiation and
//! Present event routing.
//!
//! One [`X11Backend`] serves one tracked display. It owns its own
//! connection to the server the client talks to; XIDs are server-side, so
//! the client's windows are addressable from here as well. Presentation
//! events are routed into per-registration queues by their event context
//! id, which stands in for the special event queues of the C XCB API.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::ffi::c_void;
use std::os::fd::OwnedFd;

use drm_fourcc::DrmFourcc;
use tracing::{error, info, trace, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::dri3::ConnectionExt as _;
use x11rb::protocol::present::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, VisualClass};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::backend::{
    Connect, Drawable, EventQueueId, Framebuffer, Pixmap, PresentBackend, PresentEvent,
    PresentMode, PresentRequest,
};
use crate::error::{MissingExtensionError, SetupError};
use crate::ring::GbmRing;

/// An error raised by the connection or device while serving a display.
#[derive(Debug, thiserror::Error)]
pub enum X11Error {
    /// The connection to the X server broke.
    #[error("the connection to the X server broke")]
    Connection(#[from] ConnectionError),

    /// A request was rejected by the X server.
    #[error("a request was rejected by the X server")]
    Reply(#[from] ReplyError),

    /// Allocating a protocol id failed.
    #[error("allocating a protocol id failed")]
    Id(#[from] ReplyOrIdError),

    /// Allocating a buffer ring failed.
    #[error("allocating a buffer ring failed")]
    Allocation(#[from] std::io::Error),
}

/// Protocol connection and rendering device of one display.
pub struct X11Backend {
    connection: RustConnection,
    screen: usize,
    device: gbm::Device<OwnedFd>,
    // Present events keyed by the event context they were selected with.
    pending: HashMap<u32, VecDeque<PresentEvent>>,
}

impl X11Backend {
    /// Connects to the X server, negotiates DRI3/Present and opens the
    /// rendering device the server exports.
    pub fn connect() -> Result<Self, SetupError> {
        info!("connecting to the X server");
        let (connection, screen) = RustConnection::connect(None)?;
        if connection.setup().roots.get(screen).is_none() {
            return Err(SetupError::NoScreen);
        }

        check_dri3(&connection)?;
        check_present(&connection)?;
        let fd = open_render_device(&connection, screen)?;
        let device = gbm::Device::new(fd).map_err(SetupError::Device)?;

        Ok(X11Backend {
            connection,
            screen,
            device,
            pending: HashMap::new(),
        })
    }

    fn route(&mut self, event: Event) {
        let (context, event) = match event {
            Event::PresentCompleteNotify(complete) => (
                complete.event,
                PresentEvent::Complete {
                    serial: complete.serial,
                    ust: complete.ust,
                    msc: complete.msc,
                },
            ),
            Event::PresentIdleNotify(idle) => (
                idle.event,
                PresentEvent::Idle {
                    pixmap: idle.pixmap,
                    serial: idle.serial,
                },
            ),
            Event::PresentConfigureNotify(configure) => (
                configure.event,
                PresentEvent::Configure {
                    width: configure.width,
                    height: configure.height,
                },
            ),
            Event::Error(err) => {
                error!("X11 protocol error: {err:?}");
                return;
            }
            _ => return,
        };

        match self.pending.get_mut(&context) {
            Some(queue) => queue.push_back(event),
            None => trace!(context, "presentation event for a dropped registration"),
        }
    }
}

impl PresentBackend for X11Backend {
    type Ring = GbmRing;
    type Error = X11Error;

    fn native_device(&self) -> *mut c_void {
        use gbm::AsRaw;
        self.device.as_raw() as *mut c_void
    }

    fn geometry(&mut self, drawable: Drawable) -> Result<(u16, u16), X11Error> {
        let geometry = self.connection.get_geometry(drawable)?.reply()?;
        Ok((geometry.width, geometry.height))
    }

    fn visual_id(&self, depth: u8) -> Option<u32> {
        let screen = &self.connection.setup().roots[self.screen];
        screen
            .allowed_depths
            .iter()
            .find(|allowed| allowed.depth == depth)
            .and_then(|allowed| {
                allowed
                    .visuals
                    .iter()
                    .find(|visual| visual.class == VisualClass::TRUE_COLOR)
            })
            .map(|visual| visual.visual_id)
    }

    fn create_ring(
        &mut self,
        width: u32,
        height: u32,
        format: DrmFourcc,
    ) -> Result<GbmRing, X11Error> {
        Ok(GbmRing::new(&self.device, width, height, format)?)
    }

    fn register_events(&mut self, drawable: Drawable) -> Result<EventQueueId, X11Error> {
        let context = self.connection.generate_id()?;
        self.connection
            .present_select_input(
                context,
                drawable,
                present::EventMask::COMPLETE_NOTIFY
                    | present::EventMask::IDLE_NOTIFY
                    | present::EventMask::CONFIGURE_NOTIFY,
            )?
            .check()?;
        self.pending.insert(context, VecDeque::new());
        Ok(EventQueueId(context))
    }

    fn unregister_events(&mut self, queue: EventQueueId) {
        // The server keeps the event context alive; events arriving for it
        // are dropped by the router.
        self.pending.remove(&queue.0);
    }

    fn poll_event(&mut self, queue: EventQueueId) -> Result<Option<PresentEvent>, X11Error> {
        loop {
            if let Some(event) = self
                .pending
                .get_mut(&queue.0)
                .and_then(|queued| queued.pop_front())
            {
                return Ok(Some(event));
            }
            match self.connection.poll_for_event()? {
                Some(event) => self.route(event),
                None => return Ok(None),
            }
        }
    }

    fn wait_event(&mut self, queue: EventQueueId) -> Result<PresentEvent, X11Error> {
        loop {
            if let Some(event) = self
                .pending
                .get_mut(&queue.0)
                .and_then(|queued| queued.pop_front())
            {
                return Ok(event);
            }
            if let Some(event) = self.connection.poll_for_event()? {
                self.route(event);
                continue;
            }
            let event = self.connection.wait_for_event()?;
            self.route(event);
        }
    }

    fn create_pixmap(
        &mut self,
        drawable: Drawable,
        framebuffer: &Framebuffer,
        fd: OwnedFd,
    ) -> Result<Pixmap, X11Error> {
        let pixmap = self.connection.generate_id()?;
        self.connection
            .dri3_pixmap_from_buffer(
                pixmap,
                drawable,
                u32::from(framebuffer.stride) * u32::from(framebuffer.height),
                framebuffer.width,
                framebuffer.height,
                framebuffer.stride,
                framebuffer.depth,
                framebuffer.bpp,
                fd,
            )?
            .check()?;
        Ok(pixmap)
    }

    fn free_pixmap(&mut self, pixmap: Pixmap) {
        if let Ok(cookie) = self.connection.free_pixmap(pixmap) {
            cookie.ignore_error();
        }
    }

    fn present_pixmap(&mut self, request: &PresentRequest) -> Result<(), X11Error> {
        let options = match request.mode {
            PresentMode::Vsync => present::Option::NONE,
            PresentMode::Async => present::Option::ASYNC,
        };
        self.connection
            .present_pixmap(
                request.drawable,
                request.pixmap,
                request.serial,
                x11rb::NONE, // update the whole drawable
                x11rb::NONE,
                0,
                0,
                x11rb::NONE, // let the server pick the crtc
                x11rb::NONE, // no wait fence
                x11rb::NONE, // idle is signalled by events, not fences
                options.into(),
                0,
                request.divisor,
                request.remainder,
                &[],
            )?
            .check()?;
        Ok(())
    }

    fn flush(&mut self) {
        let _ = self.connection.flush();
    }
}

impl std::fmt::Debug for X11Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X11Backend")
            .field("screen", &self.screen)
            .field("registrations", &self.pending.len())
            .finish_non_exhaustive()
    }
}

fn check_dri3(connection: &RustConnection) -> Result<(), SetupError> {
    use x11rb::protocol::dri3::X11_EXTENSION_NAME;

    if connection
        .extension_information(X11_EXTENSION_NAME)?
        .is_none()
    {
        return Err(MissingExtensionError {
            name: X11_EXTENSION_NAME,
            major: 1,
            minor: 0,
        }
        .into());
    }
    let version = connection.dri3_query_version(1, 2)?.reply()?;
    info!("DRI3 {}.{}", version.major_version, version.minor_version);
    Ok(())
}

fn check_present(connection: &RustConnection) -> Result<(), SetupError> {
    use x11rb::protocol::present::X11_EXTENSION_NAME;

    if connection
        .extension_information(X11_EXTENSION_NAME)?
        .is_none()
    {
        return Err(MissingExtensionError {
            name: X11_EXTENSION_NAME,
            major: 1,
            minor: 0,
        }
        .into());
    }
    let version = connection.present_query_version(1, 2)?.reply()?;
    info!(
        "Present {}.{}",
        version.major_version, version.minor_version
    );
    Ok(())
}

/// Opens the direct-rendering node the server exports for the screen's
/// root and flags it close-on-exec.
fn open_render_device(connection: &RustConnection, screen: usize) -> Result<OwnedFd, SetupError> {
    let root = connection.setup().roots[screen].root;
    // provider 0 asks the server for its default provider.
    let reply = connection.dri3_open(root, 0)?.reply()?;
    if reply.nfd != 1 {
        warn!(nfds = reply.nfd, "unexpected descriptor count from DRI3 open");
        return Err(SetupError::CannotDirectRender);
    }

    let fd = reply.device_fd;
    let flags = rustix::io::fcntl_getfd(&fd).map_err(|err| SetupError::Device(err.into()))?;
    rustix::io::fcntl_setfd(&fd, flags | rustix::io::FdFlags::CLOEXEC)
        .map_err(|err| SetupError::Device(err.into()))?;
    Ok(fd)
}

/// Builds one [`X11Backend`] per intercepted display.
///
/// The client's own connection cannot be borrowed across the ABI boundary,
/// so each tracked display talks to the server over its own connection;
/// the drawables the client hands in are valid on any connection to the
/// same server.
#[derive(Debug, Default)]
pub struct X11Connector;

impl Connect for X11Connector {
    type Backend = X11Backend;
    type Error = SetupError;

    fn connect(&mut self, _native: usize) -> Result<X11Backend, SetupError> {
        X11Backend::connect()
    }
}
