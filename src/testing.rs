//! Scripted stand-ins for the collaborator seams, used by the unit tests.
//!
//! The fakes record every request the tracking core makes and only deliver
//! the events a test scripts, so the state machine can be driven through
//! exact sequences without a display server or GPU.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ffi::c_void;
use std::fs::File;
use std::os::fd::OwnedFd;

use drm_fourcc::DrmFourcc;

use crate::api::EglApi;
use crate::backend::{
    BufferId, BufferRing, Connect, Drawable, EventQueueId, Framebuffer, Pixmap, PresentBackend,
    PresentEvent, PresentRequest, RingBuffer,
};
use crate::ffi;

/// Fabricates an opaque handle from a small integer.
pub(crate) fn handle(value: usize) -> *mut c_void {
    value as *mut c_void
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum FakeError {
    #[error("no free buffer in the fake ring")]
    Exhausted,
    #[error("the fake server rejected the request")]
    Rejected,
    #[error("no scripted event left, the wait would block forever")]
    WouldBlock,
}

#[derive(Debug)]
pub(crate) struct FakeBo {
    id: BufferId,
}

impl RingBuffer for FakeBo {
    fn id(&self) -> BufferId {
        self.id
    }

    fn width(&self) -> u32 {
        640
    }

    fn height(&self) -> u32 {
        480
    }

    fn stride(&self) -> u32 {
        640 * 4
    }

    fn export_fd(&self) -> std::io::Result<OwnedFd> {
        Ok(File::open("/dev/null")?.into())
    }
}

/// A ring handing out buffers in free-list order.
#[derive(Debug)]
pub(crate) struct FakeRing {
    free: VecDeque<FakeBo>,
    pub locked: usize,
    pub released: Vec<BufferId>,
}

impl FakeRing {
    pub fn new(slots: usize) -> Self {
        FakeRing {
            free: (0..slots)
                .map(|slot| FakeBo {
                    id: BufferId(slot as u64),
                })
                .collect(),
            locked: 0,
            released: Vec::new(),
        }
    }
}

impl BufferRing for FakeRing {
    type Buffer = FakeBo;
    type Error = FakeError;

    fn lock_front(&mut self) -> Result<FakeBo, FakeError> {
        let bo = self.free.pop_front().ok_or(FakeError::Exhausted)?;
        self.locked += 1;
        Ok(bo)
    }

    fn release(&mut self, buffer: FakeBo) {
        self.locked -= 1;
        self.released.push(buffer.id);
        self.free.push_back(buffer);
    }

    fn native_window(&self) -> *mut c_void {
        std::ptr::null_mut()
    }
}

/// A backend that records requests and replays scripted events.
#[derive(Debug)]
pub(crate) struct FakeBackend {
    next_context: u32,
    next_pixmap: Pixmap,
    registrations: HashMap<Drawable, u32>,
    pub queues: HashMap<u32, VecDeque<PresentEvent>>,
    pub rings: Vec<(u32, u32, DrmFourcc)>,
    pub presents: Vec<PresentRequest>,
    pub created: Vec<Pixmap>,
    pub freed: Vec<Pixmap>,
    pub waits: usize,
    pub flushes: usize,
    /// Acknowledge every present with a complete notification, like a
    /// server answering a present request.
    pub complete_on_present: bool,
    pub reject_pixmaps: bool,
    pub reject_presents: bool,
    pub geometry: (u16, u16),
}

impl FakeBackend {
    pub fn new() -> Self {
        FakeBackend {
            next_context: 1,
            next_pixmap: 0x0a00_0000,
            registrations: HashMap::new(),
            queues: HashMap::new(),
            rings: Vec::new(),
            presents: Vec::new(),
            created: Vec::new(),
            freed: Vec::new(),
            waits: 0,
            flushes: 0,
            complete_on_present: true,
            reject_pixmaps: false,
            reject_presents: false,
            geometry: (640, 480),
        }
    }

    /// Queues an event for the registration watching `drawable`.
    pub fn push_event(&mut self, drawable: Drawable, event: PresentEvent) {
        let context = self.registrations[&drawable];
        self.queues
            .get_mut(&context)
            .expect("registration without a queue")
            .push_back(event);
    }
}

impl PresentBackend for FakeBackend {
    type Ring = FakeRing;
    type Error = FakeError;

    fn native_device(&self) -> *mut c_void {
        handle(0xdead_0000)
    }

    fn geometry(&mut self, _drawable: Drawable) -> Result<(u16, u16), FakeError> {
        Ok(self.geometry)
    }

    fn visual_id(&self, _depth: u8) -> Option<u32> {
        Some(0x21)
    }

    fn create_ring(
        &mut self,
        width: u32,
        height: u32,
        format: DrmFourcc,
    ) -> Result<FakeRing, FakeError> {
        self.rings.push((width, height, format));
        Ok(FakeRing::new(4))
    }

    fn register_events(&mut self, drawable: Drawable) -> Result<EventQueueId, FakeError> {
        let context = self.next_context;
        self.next_context += 1;
        self.registrations.insert(drawable, context);
        self.queues.insert(context, VecDeque::new());
        Ok(EventQueueId(context))
    }

    fn unregister_events(&mut self, queue: EventQueueId) {
        self.queues.remove(&queue.0);
        self.registrations.retain(|_, context| *context != queue.0);
    }

    fn poll_event(&mut self, queue: EventQueueId) -> Result<Option<PresentEvent>, FakeError> {
        Ok(self.queues.get_mut(&queue.0).and_then(VecDeque::pop_front))
    }

    fn wait_event(&mut self, queue: EventQueueId) -> Result<PresentEvent, FakeError> {
        self.waits += 1;
        self.queues
            .get_mut(&queue.0)
            .and_then(VecDeque::pop_front)
            .ok_or(FakeError::WouldBlock)
    }

    fn create_pixmap(
        &mut self,
        _drawable: Drawable,
        _framebuffer: &Framebuffer,
        _fd: OwnedFd,
    ) -> Result<Pixmap, FakeError> {
        if self.reject_pixmaps {
            return Err(FakeError::Rejected);
        }
        let pixmap = self.next_pixmap;
        self.next_pixmap += 1;
        self.created.push(pixmap);
        Ok(pixmap)
    }

    fn free_pixmap(&mut self, pixmap: Pixmap) {
        self.freed.push(pixmap);
    }

    fn present_pixmap(&mut self, request: &PresentRequest) -> Result<(), FakeError> {
        if self.reject_presents {
            return Err(FakeError::Rejected);
        }
        self.presents.push(*request);
        if self.complete_on_present {
            if let Some(context) = self.registrations.get(&request.drawable) {
                self.queues
                    .get_mut(context)
                    .expect("registration without a queue")
                    .push_back(PresentEvent::Complete {
                        serial: request.serial,
                        ust: 0,
                        msc: 0,
                    });
            }
        }
        Ok(())
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

/// Connector producing one [`FakeBackend`] per display.
#[derive(Debug, Default)]
pub(crate) struct FakeConnector {
    pub fail: bool,
}

impl Connect for FakeConnector {
    type Backend = FakeBackend;
    type Error = FakeError;

    fn connect(&mut self, _native: usize) -> Result<FakeBackend, FakeError> {
        if self.fail {
            return Err(FakeError::Rejected);
        }
        Ok(FakeBackend::new())
    }
}

/// A scripted real-EGL implementation.
#[derive(Debug)]
pub(crate) struct FakeApi {
    display: *mut c_void,
    attribs: HashMap<ffi::EGLint, ffi::EGLint>,
    pub fail_surfaces: bool,
    pub fail_swaps: bool,
    next_surface: Cell<usize>,
    windows: RefCell<Vec<*mut c_void>>,
    pub swaps: RefCell<Vec<(ffi::EGLDisplay, ffi::EGLSurface)>>,
}

impl FakeApi {
    pub fn new(display: *mut c_void) -> Self {
        FakeApi {
            display,
            attribs: HashMap::new(),
            fail_surfaces: false,
            fail_swaps: false,
            next_surface: Cell::new(0x100),
            windows: RefCell::new(Vec::new()),
            swaps: RefCell::new(Vec::new()),
        }
    }

    pub fn set_attrib(&mut self, attribute: ffi::EGLint, value: ffi::EGLint) {
        self.attribs.insert(attribute, value);
    }

    /// The native windows the real implementation was asked to wrap.
    pub fn windows_seen(&self) -> Vec<*mut c_void> {
        self.windows.borrow().clone()
    }
}

impl EglApi for FakeApi {
    fn get_display(&self, _native: ffi::EGLNativeDisplayType) -> ffi::EGLDisplay {
        ffi::EGLDisplay(self.display)
    }

    fn get_config_attrib(
        &self,
        _display: ffi::EGLDisplay,
        _config: ffi::EGLConfig,
        attribute: ffi::EGLint,
    ) -> Option<ffi::EGLint> {
        self.attribs.get(&attribute).copied()
    }

    fn create_window_surface(
        &self,
        _display: ffi::EGLDisplay,
        _config: ffi::EGLConfig,
        window: ffi::EGLNativeWindowType,
        _attribs: *const ffi::EGLint,
    ) -> ffi::EGLSurface {
        self.windows.borrow_mut().push(window);
        if self.fail_surfaces {
            return ffi::EGL_NO_SURFACE;
        }
        let surface = self.next_surface.get();
        self.next_surface.set(surface + 1);
        ffi::EGLSurface(handle(surface))
    }

    fn swap_buffers(&self, display: ffi::EGLDisplay, surface: ffi::EGLSurface) -> bool {
        self.swaps.borrow_mut().push((display, surface));
        !self.fail_swaps
    }
}
