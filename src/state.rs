//! Single-slot, last-write-wins state shared between the capture thread and the UI thread.
//!
//! Values are published as whole `Arc`s under a mutex, so a reader either sees the previous value
//! or the new one, never a mix. No history is kept: if the writer publishes several values between
//! two reads, the reader only observes the last one.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::image::CaptureImage;
use crate::landmark::DetectionResult;

/// A most-recent-value cell with change tracking for a single consumer.
pub struct Latest<T> {
    slot: Mutex<Slot<T>>,
}

struct Slot<T> {
    value: Option<Arc<T>>,
    /// Incremented on every publish.
    version: u64,
    /// `version` at the time of the last [`Latest::read`].
    seen: u64,
}

/// A value returned by [`Latest::read`].
#[derive(Debug)]
pub struct Snapshot<T> {
    value: Option<Arc<T>>,
    version: u64,
    changed: bool,
}

impl<T> Snapshot<T> {
    /// The most recently published value, or `None` if nothing was published yet.
    #[inline]
    pub fn value(&self) -> Option<&Arc<T>> {
        self.value.as_ref()
    }

    #[inline]
    pub fn into_value(self) -> Option<Arc<T>> {
        self.value
    }

    /// Number of values published so far.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether a value was published since the previous [`Latest::read`].
    #[inline]
    pub fn changed(&self) -> bool {
        self.changed
    }
}

impl<T> Default for Latest<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Self {
            value: None,
            version: 0,
            seen: 0,
        }
    }

    fn publish(&mut self, value: Arc<T>) -> u64 {
        self.value = Some(value);
        self.version += 1;
        self.version
    }

    fn read(&mut self) -> Snapshot<T> {
        let changed = self.is_dirty();
        self.seen = self.version;
        Snapshot {
            value: self.value.clone(),
            version: self.version,
            changed,
        }
    }

    fn is_dirty(&self) -> bool {
        self.seen != self.version
    }
}

impl<T> Latest<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::new()),
        }
    }

    // The slot only ever holds complete values, so a panic while the lock was held cannot leave
    // it half-written.
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the stored value and marks it as changed.
    ///
    /// Returns the new version number.
    pub fn publish(&self, value: T) -> u64 {
        let value = Arc::new(value);
        self.lock().publish(value)
    }

    /// Returns the current value and clears the changed flag.
    pub fn read(&self) -> Snapshot<T> {
        self.lock().read()
    }

    /// Returns the current value without clearing the changed flag.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.lock().value.clone()
    }

    /// Returns `true` if a value was published since the last [`Latest::read`].
    pub fn is_dirty(&self) -> bool {
        self.lock().is_dirty()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }
}

/// Where the landmark pipeline currently is.
///
/// ```text
/// Uninitialized -> Tracking <-> NoHandVisible   (EmptyDetectionPolicy::Clear)
///                  Tracking <-> Stale           (EmptyDetectionPolicy::KeepLast)
/// any -> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No capture/inference cycle has completed yet.
    Uninitialized,
    /// The displayed landmarks belong to the most recent frame.
    Tracking,
    /// The hand was lost, the last known landmarks are still displayed.
    Stale,
    /// The hand was lost and the display was cleared.
    NoHandVisible,
    /// The capture loop has exited.
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Uninitialized => "starting",
            PipelineState::Tracking => "tracking",
            PipelineState::Stale => "hand lost, showing last pose",
            PipelineState::NoHandVisible => "no hand visible",
            PipelineState::Stopped => "stopped",
        })
    }
}

/// The most recent result together with the state it put the pipeline in.
struct Tracked {
    result: Slot<DetectionResult>,
    state: PipelineState,
}

/// The bridge between the capture loop (writer) and the renderer (reader).
///
/// Holds the most recent [`DetectionResult`], the most recent camera image, and the
/// [`PipelineState`]. The result and the state live under the same lock, so they are always
/// observed together.
pub struct SharedLandmarkState {
    tracked: Mutex<Tracked>,
    frames: Latest<CaptureImage>,
}

impl Default for SharedLandmarkState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedLandmarkState {
    pub fn new() -> Self {
        Self {
            tracked: Mutex::new(Tracked {
                result: Slot::new(),
                state: PipelineState::Uninitialized,
            }),
            frames: Latest::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrites the stored [`DetectionResult`] and marks it dirty.
    ///
    /// The state becomes [`PipelineState::Tracking`], or [`PipelineState::NoHandVisible`] if
    /// `result` is empty.
    pub fn publish(&self, result: DetectionResult) {
        let state = if result.is_empty() {
            PipelineState::NoHandVisible
        } else {
            PipelineState::Tracking
        };
        let result = Arc::new(result);

        let mut tracked = self.lock();
        tracked.state = state;
        tracked.result.publish(result);
    }

    /// Returns the current [`DetectionResult`] and clears the dirty flag.
    pub fn read(&self) -> Snapshot<DetectionResult> {
        self.lock().result.read()
    }

    /// Like [`SharedLandmarkState::read`], but also returns the state that belongs to the result.
    pub fn read_with_state(&self) -> (Snapshot<DetectionResult>, PipelineState) {
        let mut tracked = self.lock();
        let snapshot = tracked.result.read();
        (snapshot, tracked.state)
    }

    /// Returns the current [`DetectionResult`] without touching the dirty flag.
    pub fn latest(&self) -> Option<Arc<DetectionResult>> {
        self.lock().result.value.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().result.is_dirty()
    }

    /// Keeps the stored landmarks but records that they no longer match the camera image.
    pub fn mark_stale(&self) {
        let mut tracked = self.lock();
        if tracked.state == PipelineState::Tracking {
            tracked.state = PipelineState::Stale;
        }
    }

    /// Publishes the most recent camera image.
    pub fn publish_frame(&self, image: CaptureImage) {
        self.frames.publish(image);
    }

    /// Returns the most recent camera image and clears its dirty flag.
    pub fn read_frame(&self) -> Snapshot<CaptureImage> {
        self.frames.read()
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub(crate) fn set_state(&self, state: PipelineState) {
        self.lock().state = state;
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crate::landmark::{Landmark, LandmarkSet, NUM_LANDMARKS};

    use super::*;

    fn hand(value: f32) -> LandmarkSet {
        LandmarkSet::new([Landmark::new(value, value, value); NUM_LANDMARKS])
    }

    #[test]
    fn read_clears_dirty_flag() {
        let cell = Latest::new();
        let snap = cell.read();
        assert!(!snap.changed());
        assert!(snap.value().is_none());

        cell.publish(1);
        assert!(cell.is_dirty());
        let snap = cell.read();
        assert!(snap.changed());
        assert_eq!(**snap.value().unwrap(), 1);
        assert!(!cell.is_dirty());

        let snap = cell.read();
        assert!(!snap.changed());
        assert_eq!(**snap.value().unwrap(), 1);
    }

    #[test]
    fn most_recent_wins() {
        let cell = Latest::new();
        for i in 0..10 {
            cell.publish(i);
        }
        let snap = cell.read();
        assert_eq!(snap.version(), 10);
        assert_eq!(**snap.value().unwrap(), 9);
        assert!(!cell.read().changed());
    }

    #[test]
    fn peek_keeps_dirty_flag() {
        let cell = Latest::new();
        cell.publish("a");
        assert_eq!(*cell.peek().unwrap(), "a");
        assert!(cell.is_dirty());
    }

    #[test]
    fn state_transitions() {
        let state = SharedLandmarkState::new();
        assert_eq!(state.state(), PipelineState::Uninitialized);

        state.publish(DetectionResult::new(vec![hand(0.5)]));
        assert_eq!(state.state(), PipelineState::Tracking);

        state.mark_stale();
        assert_eq!(state.state(), PipelineState::Stale);
        assert!(!state.read().value().unwrap().is_empty());

        state.publish(DetectionResult::empty());
        assert_eq!(state.state(), PipelineState::NoHandVisible);
        state.mark_stale();
        assert_eq!(state.state(), PipelineState::NoHandVisible);
    }

    #[test]
    fn concurrent_readers_never_see_torn_sets() {
        let state = Arc::new(SharedLandmarkState::new());

        let writer = thread::spawn({
            let state = state.clone();
            move || {
                for i in 0..2000 {
                    let value = i as f32;
                    let hands = (0..=(i % 3)).map(|_| hand(value)).collect();
                    state.publish(hands);
                }
            }
        });

        let mut last_version = 0;
        while !writer.is_finished() {
            let snap = state.read();
            assert!(snap.version() >= last_version);
            last_version = snap.version();
            if let Some(result) = snap.value() {
                let first = result.first().unwrap().landmarks()[0];
                for set in result.hands() {
                    assert!(set.iter().all(|lm| lm == first));
                }
            }
        }
        writer.join().unwrap();

        let snap = state.read();
        assert_eq!(snap.version(), 2000);
        assert_eq!(snap.value().unwrap().first().unwrap().landmarks()[0].x, 1999.0);
    }

    #[test]
    fn state_matches_published_result() {
        let state = Arc::new(SharedLandmarkState::new());

        let writer = thread::spawn({
            let state = state.clone();
            move || {
                for i in 0..2000 {
                    if i % 2 == 0 {
                        state.publish(DetectionResult::new(vec![hand(i as f32)]));
                    } else {
                        state.publish(DetectionResult::empty());
                    }
                }
            }
        });

        while !writer.is_finished() {
            let (snap, status) = state.read_with_state();
            match snap.value() {
                Some(result) if result.is_empty() => {
                    assert_eq!(status, PipelineState::NoHandVisible)
                }
                Some(_) => assert_eq!(status, PipelineState::Tracking),
                None => assert_eq!(status, PipelineState::Uninitialized),
            }
        }
        writer.join().unwrap();
        assert_eq!(state.state(), PipelineState::NoHandVisible);
    }
}
