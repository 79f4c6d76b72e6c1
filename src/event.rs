//! Per-surface queue of presentation events.
//!
//! One queue is registered per tracked window. Draining is split in two:
//! a non-blocking poll that hands back whatever already arrived, and a
//! blocking wait that guarantees progress by sleeping on the connection for
//! at least one event and then sweeping up the rest. Callers poll first so
//! an idle notification that already arrived never turns into a needless
//! block.

use smallvec::SmallVec;
use tracing::error;

use crate::backend::{Drawable, EventQueueId, PresentBackend, PresentEvent};

/// Events collected by one drain pass.
pub type EventBatch = SmallVec<[PresentEvent; 4]>;

/// Registration for complete/idle/configure notifications on one drawable.
#[derive(Debug)]
pub struct PresentEventQueue {
    id: EventQueueId,
    drawable: Drawable,
}

impl PresentEventQueue {
    /// Registers interest in presentation events for `drawable`.
    pub fn init<B: PresentBackend>(backend: &mut B, drawable: Drawable) -> Result<Self, B::Error> {
        match backend.register_events(drawable) {
            Ok(id) => Ok(PresentEventQueue { id, drawable }),
            Err(err) => {
                error!(drawable, "registering for presentation events failed: {err}");
                Err(err)
            }
        }
    }

    /// The drawable this queue watches.
    pub fn drawable(&self) -> Drawable {
        self.drawable
    }

    /// Returns every already-queued event without blocking.
    pub fn poll<B: PresentBackend>(&self, backend: &mut B) -> Result<EventBatch, B::Error> {
        let mut events = EventBatch::new();
        while let Some(event) = backend.poll_event(self.id)? {
            events.push(event);
        }
        Ok(events)
    }

    /// Blocks until at least one event arrives, then drains whatever else is
    /// already queued.
    pub fn wait<B: PresentBackend>(&self, backend: &mut B) -> Result<EventBatch, B::Error> {
        let mut events = EventBatch::new();
        events.push(backend.wait_event(self.id)?);
        while let Some(event) = backend.poll_event(self.id)? {
            events.push(event);
        }
        Ok(events)
    }

    /// Drops the registration.
    pub fn release<B: PresentBackend>(&self, backend: &mut B) {
        backend.unregister_events(self.id);
    }
}
