//! `wp_presentation` feedback tracking
//!
//! Every feedback object is resolved exactly once, either `presented` or
//! `discarded`. The wire object is destroyed by that destructor event, so a
//! second resolution is a bookkeeping bug and is reported as one.

use super::{Extension, ProtocolEvent};
use crate::ids::{FeedbackId, IdAllocator, OutputId, SurfaceId};
use log::{debug, error};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const INTERFACE: &str = "wp_presentation";
pub const VERSION: u32 = 1;

/// `wp_presentation_feedback.kind` bits
pub const KIND_VSYNC: u32 = 0x1;
pub const KIND_HW_CLOCK: u32 = 0x2;
pub const KIND_HW_COMPLETION: u32 = 0x4;
pub const KIND_ZERO_COPY: u32 = 0x8;

/// Clock domain advertised with `clock_id`.
pub fn clock_id() -> u32 {
    libc::CLOCK_MONOTONIC as u32
}

/// Current `CLOCK_MONOTONIC` time.
pub fn monotonic_now() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime only writes into the provided timespec.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return Duration::ZERO;
    }
    Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
}

/// What the render pipeline reports about a displayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncPoint {
    pub output: Option<OutputId>,
    /// Nanoseconds until the next refresh, 0 if unknown
    pub refresh_nsec: u32,
    /// Vertical retrace counter, 0 if unknown
    pub sequence: u64,
    pub flags: u32,
}

/// Payload of a `presented` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationTime {
    pub tv_sec: u64,
    pub tv_nsec: u32,
    pub refresh_nsec: u32,
    pub sequence: u64,
    pub flags: u32,
    pub output: Option<OutputId>,
}

impl PresentationTime {
    pub fn tv_sec_hi(&self) -> u32 {
        (self.tv_sec >> 32) as u32
    }

    pub fn tv_sec_lo(&self) -> u32 {
        (self.tv_sec & 0xffff_ffff) as u32
    }

    pub fn seq_hi(&self) -> u32 {
        (self.sequence >> 32) as u32
    }

    pub fn seq_lo(&self) -> u32 {
        (self.sequence & 0xffff_ffff) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresentationError {
    #[error("{0} was already resolved")]
    AlreadyResolved(FeedbackId),
    #[error("{0} was never created")]
    Unknown(FeedbackId),
}

#[derive(Debug, Default)]
pub struct PresentationTimeExtension {
    pending: HashMap<SurfaceId, Vec<FeedbackId>>,
    owner: HashMap<FeedbackId, SurfaceId>,
    ids: IdAllocator,
    events: Vec<ProtocolEvent>,
}

impl PresentationTimeExtension {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending feedback for the next presentation of `surface`.
    pub fn feedback(&mut self, surface: SurfaceId) -> FeedbackId {
        let id = FeedbackId(self.ids.next());
        self.pending.entry(surface).or_default().push(id);
        self.owner.insert(id, surface);
        debug!("Feedback {} requested for {}", id, surface);
        id
    }

    pub fn pending_count(&self, surface: SurfaceId) -> usize {
        self.pending.get(&surface).map_or(0, Vec::len)
    }

    pub fn is_pending(&self, feedback: FeedbackId) -> bool {
        self.owner.contains_key(&feedback)
    }

    /// Resolves every pending feedback of `surface` as presented. A zero
    /// `frame_time` means "now" on `CLOCK_MONOTONIC`.
    pub fn present(&mut self, surface: SurfaceId, sync: SyncPoint, frame_time: Duration) -> usize {
        let time = if frame_time.is_zero() {
            monotonic_now()
        } else {
            frame_time
        };
        let timing = PresentationTime {
            tv_sec: time.as_secs(),
            tv_nsec: time.subsec_nanos(),
            refresh_nsec: sync.refresh_nsec,
            sequence: sync.sequence,
            flags: sync.flags,
            output: sync.output,
        };
        let ids = self.pending.remove(&surface).unwrap_or_default();
        let count = ids.len();
        for id in ids {
            if let Err(e) = self.resolve_presented(id, timing) {
                error!("Presentation bookkeeping broken: {}", e);
            }
        }
        count
    }

    /// Resolves every pending feedback of `surface` as discarded.
    pub fn discard(&mut self, surface: SurfaceId) -> usize {
        let ids = self.pending.remove(&surface).unwrap_or_default();
        let count = ids.len();
        for id in ids {
            if let Err(e) = self.resolve_discarded(id) {
                error!("Presentation bookkeeping broken: {}", e);
            }
        }
        count
    }

    /// Resolves one feedback as presented.
    pub fn resolve_presented(
        &mut self,
        feedback: FeedbackId,
        timing: PresentationTime,
    ) -> Result<(), PresentationError> {
        let surface = self.take(feedback)?;
        self.events.push(ProtocolEvent::FeedbackPresented {
            feedback,
            surface,
            time: timing,
        });
        Ok(())
    }

    /// Resolves one feedback as discarded.
    pub fn resolve_discarded(&mut self, feedback: FeedbackId) -> Result<(), PresentationError> {
        let surface = self.take(feedback)?;
        self.events
            .push(ProtocolEvent::FeedbackDiscarded { feedback, surface });
        Ok(())
    }

    fn take(&mut self, feedback: FeedbackId) -> Result<SurfaceId, PresentationError> {
        match self.owner.remove(&feedback) {
            Some(surface) => {
                if let Some(list) = self.pending.get_mut(&surface) {
                    list.retain(|id| *id != feedback);
                    if list.is_empty() {
                        self.pending.remove(&surface);
                    }
                }
                Ok(surface)
            }
            None if self.ids.was_issued(feedback.0) => {
                Err(PresentationError::AlreadyResolved(feedback))
            }
            None => Err(PresentationError::Unknown(feedback)),
        }
    }
}

impl Extension for PresentationTimeExtension {
    fn interface(&self) -> &'static str {
        INTERFACE
    }

    fn version(&self) -> u32 {
        VERSION
    }

    fn surface_destroyed(&mut self, surface: SurfaceId) {
        let discarded = self.discard(surface);
        if discarded > 0 {
            debug!("Discarded {} feedbacks of destroyed {}", discarded, surface);
        }
    }

    fn take_events(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_resolves_every_pending() {
        let mut ext = PresentationTimeExtension::new();
        let s = SurfaceId(1);
        let a = ext.feedback(s);
        let b = ext.feedback(s);
        let other = ext.feedback(SurfaceId(2));

        let sync = SyncPoint {
            output: Some(OutputId(1)),
            refresh_nsec: 16_666_666,
            sequence: (7u64 << 32) | 9,
            flags: KIND_VSYNC | KIND_HW_CLOCK,
        };
        assert_eq!(ext.present(s, sync, Duration::new(5, 250)), 2);

        let events = ext.take_events();
        assert_eq!(events.len(), 2);
        for (event, expected) in events.iter().zip([a, b]) {
            match event {
                ProtocolEvent::FeedbackPresented { feedback, surface, time } => {
                    assert_eq!(*feedback, expected);
                    assert_eq!(*surface, s);
                    assert_eq!((time.tv_sec, time.tv_nsec), (5, 250));
                    assert_eq!((time.seq_hi(), time.seq_lo()), (7, 9));
                    assert_eq!(time.flags, KIND_VSYNC | KIND_HW_CLOCK);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(ext.pending_count(s), 0);
        assert!(ext.is_pending(other));
    }

    #[test]
    fn test_zero_frame_time_uses_monotonic_clock() {
        let mut ext = PresentationTimeExtension::new();
        let s = SurfaceId(1);
        ext.feedback(s);
        let before = monotonic_now();
        ext.present(s, SyncPoint::default(), Duration::ZERO);
        match ext.take_events().as_slice() {
            [ProtocolEvent::FeedbackPresented { time, .. }] => {
                let t = Duration::new(time.tv_sec, time.tv_nsec);
                assert!(t >= before);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_second_resolution_is_detected() {
        let mut ext = PresentationTimeExtension::new();
        let s = SurfaceId(1);
        let fb = ext.feedback(s);
        ext.resolve_discarded(fb).unwrap();
        assert_eq!(
            ext.resolve_discarded(fb),
            Err(PresentationError::AlreadyResolved(fb))
        );
        assert_eq!(
            ext.resolve_discarded(FeedbackId(99)),
            Err(PresentationError::Unknown(FeedbackId(99)))
        );
        // present after discard must not produce a second event for fb
        assert_eq!(ext.present(s, SyncPoint::default(), Duration::new(1, 0)), 0);
        assert_eq!(ext.take_events().len(), 1);
    }

    #[test]
    fn test_surface_destruction_discards() {
        let mut ext = PresentationTimeExtension::new();
        let s = SurfaceId(4);
        let fb = ext.feedback(s);
        ext.surface_destroyed(s);
        assert_eq!(
            ext.take_events(),
            vec![ProtocolEvent::FeedbackDiscarded {
                feedback: fb,
                surface: s
            }]
        );
        assert!(!ext.is_pending(fb));
    }

    #[test]
    fn test_clock_id_is_monotonic() {
        assert_eq!(clock_id(), libc::CLOCK_MONOTONIC as u32);
    }
}
