//! The background capture → inference → publish loop.
//!
//! [`CaptureLoop`] owns a [`FrameSource`] and a [`LandmarkEngine`] and drives both from a
//! dedicated thread. Its only connection to the UI thread is the [`SharedLandmarkState`] it
//! publishes into; it never touches GPU resources.

use std::{
    any::Any,
    io,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::drop::defer;
use crate::engine::LandmarkEngine;
use crate::landmark::DetectionResult;
use crate::state::{PipelineState, SharedLandmarkState};
use crate::timer::{FpsCounter, Timer};
use crate::video::FrameSource;

/// What to do with a frame in which no hand was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyDetectionPolicy {
    /// Publish the empty result, so the view shows that no hand is visible.
    #[default]
    Clear,
    /// Keep the last published landmarks on display and mark them as stale.
    KeepLast,
}

/// Delay schedule for retrying after the frame source failed to deliver a frame.
///
/// The first retry happens immediately, later ones wait `initial`, `2 * initial`, `4 * initial`,
/// and so on, up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), Duration::from_secs(1))
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Retries immediately, forever.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Returns the time to wait after `failures` consecutive failed captures.
    pub fn delay(&self, failures: u32) -> Duration {
        match failures {
            0 | 1 => Duration::ZERO,
            n => {
                let factor = 1u32.checked_shl(n - 2).unwrap_or(u32::MAX);
                self.initial.saturating_mul(factor).min(self.max)
            }
        }
    }
}

/// Configuration of a [`CaptureLoop`].
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    empty_policy: EmptyDetectionPolicy,
    backoff: Backoff,
}

impl CaptureOptions {
    #[inline]
    pub fn empty_policy(self, empty_policy: EmptyDetectionPolicy) -> Self {
        Self {
            empty_policy,
            ..self
        }
    }

    #[inline]
    pub fn backoff(self, backoff: Backoff) -> Self {
        Self { backoff, ..self }
    }
}

/// A flag that asks a [`CaptureLoop`] to exit.
///
/// Clones share the same flag.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal, waking up a loop that is waiting to retry.
    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `timeout` or until the signal is raised. Returns whether it was raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(PoisonError::into_inner);
        if timeout.is_zero() {
            return *guard;
        }
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Outcome of a single [`CaptureLoop::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The stop signal was raised; no inference was started.
    Stopped,
    /// The frame source did not deliver a frame, or panicked.
    NoFrame,
    /// A result with this many hands was published.
    Published(usize),
    /// No hand was found and the previous landmarks were kept.
    KeptLast,
}

/// Drives a [`FrameSource`] and a [`LandmarkEngine`], publishing every result.
pub struct CaptureLoop<S, E> {
    source: S,
    engine: E,
    shared: Arc<SharedLandmarkState>,
    options: CaptureOptions,
    stop: StopSignal,
    failures: u32,
    t_capture: Timer,
    t_convert: Timer,
    t_infer: Timer,
}

impl<S: FrameSource, E: LandmarkEngine> CaptureLoop<S, E> {
    pub fn new(
        source: S,
        engine: E,
        shared: Arc<SharedLandmarkState>,
        options: CaptureOptions,
    ) -> Self {
        Self {
            source,
            engine,
            shared,
            options,
            stop: StopSignal::new(),
            failures: 0,
            t_capture: Timer::new("capture"),
            t_convert: Timer::new("convert"),
            t_infer: Timer::new("infer"),
        }
    }

    /// Makes the loop observe `stop` instead of its own signal.
    pub fn with_stop_signal(self, stop: StopSignal) -> Self {
        Self { stop, ..self }
    }

    /// Returns a handle to the signal that makes [`CaptureLoop::run`] return.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn shared(&self) -> &Arc<SharedLandmarkState> {
        &self.shared
    }

    /// Runs one capture → convert → infer → publish cycle.
    ///
    /// The stop signal is checked before capturing and again before inference, so a stop request
    /// never interrupts an inference that is already running, and never lets a new one start.
    pub fn step(&mut self) -> Step {
        if self.stop.is_stopped() {
            return Step::Stopped;
        }

        let source = &mut self.source;
        let raw = self
            .t_capture
            .time(|| catch_unwind(AssertUnwindSafe(|| source.try_read_frame())))
            .unwrap_or_else(|payload| {
                log::error!("frame source panicked: {}", panic_message(&*payload));
                None
            });
        let Some(raw) = raw else {
            self.failures = self.failures.saturating_add(1);
            if self.failures == 1 {
                log::warn!("no frame from capture source, retrying");
            } else {
                log::debug!("no frame from capture source ({} in a row)", self.failures);
            }
            return Step::NoFrame;
        };
        self.failures = 0;

        let frame = self.t_convert.time(|| raw.to_rgb());
        self.shared.publish_frame(frame.to_rgba());

        if self.stop.is_stopped() {
            return Step::Stopped;
        }

        let engine = &mut self.engine;
        let result = self
            .t_infer
            .time(|| catch_unwind(AssertUnwindSafe(|| engine.infer(&frame))));
        let result = match result {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                log::error!("landmark inference failed: {e:#}");
                DetectionResult::empty()
            }
            Err(payload) => {
                log::error!(
                    "landmark engine panicked, treating frame as empty: {}",
                    panic_message(&*payload)
                );
                DetectionResult::empty()
            }
        };

        if result.is_empty() && self.options.empty_policy == EmptyDetectionPolicy::KeepLast {
            self.shared.mark_stale();
            return Step::KeptLast;
        }

        if let Some(hand) = result.first() {
            log::trace!("landmarks:\n{hand}");
        }
        let hands = result.len();
        self.shared.publish(result);
        Step::Published(hands)
    }

    /// Returns the loop's own profiling timers, followed by those of the source and engine.
    pub fn timers(&self) -> Vec<&Timer> {
        let mut timers = vec![&self.t_capture, &self.t_convert, &self.t_infer];
        timers.extend(self.source.timers());
        timers.extend(self.engine.timers());
        timers
    }

    /// Runs the loop on the calling thread until the stop signal is raised.
    ///
    /// The engine and frame source are dropped (closing their sessions) when this returns.
    pub fn run(mut self) {
        let shared = self.shared.clone();
        let _guard = defer(move || {
            shared.set_state(PipelineState::Stopped);
            log::debug!("capture loop exiting");
        });
        log::debug!("capture loop starting");

        let mut fps = FpsCounter::new("capture");
        loop {
            match self.step() {
                Step::Stopped => break,
                Step::NoFrame => {
                    let delay = self.options.backoff.delay(self.failures);
                    if self.stop.wait_timeout(delay) {
                        break;
                    }
                }
                Step::Published(_) | Step::KeptLast => {
                    fps.tick_with(self.timers());
                }
            }

            thread::yield_now();
        }
    }
}

impl<S, E> CaptureLoop<S, E>
where
    S: FrameSource + Send + 'static,
    E: LandmarkEngine + Send + 'static,
{
    /// Starts the loop on a new background thread.
    pub fn spawn(self) -> io::Result<CaptureHandle> {
        let stop = self.stop_signal();
        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || self.run())?;

        Ok(CaptureHandle {
            stop,
            handle: Some(handle),
        })
    }
}

/// Opens a frame source and engine on a new background thread and runs a [`CaptureLoop`] there.
///
/// Opening devices and loading networks can block for a long time, and some of them cannot move
/// between threads, so `init` runs on the capture thread. If it fails, the error is logged and the
/// pipeline goes straight to [`PipelineState::Stopped`]. The same happens if `init` panics; the
/// panic is then returned by [`CaptureHandle::join`].
pub fn spawn_with<S, E, F>(
    shared: Arc<SharedLandmarkState>,
    options: CaptureOptions,
    init: F,
) -> io::Result<CaptureHandle>
where
    S: FrameSource,
    E: LandmarkEngine,
    F: FnOnce() -> anyhow::Result<(S, E)> + Send + 'static,
{
    let stop = StopSignal::new();
    let thread_stop = stop.clone();
    let handle = thread::Builder::new()
        .name("capture".into())
        .spawn(move || {
            let _stopped = defer({
                let shared = shared.clone();
                move || shared.set_state(PipelineState::Stopped)
            });
            match init() {
                Ok((source, engine)) => CaptureLoop::new(source, engine, shared, options)
                    .with_stop_signal(thread_stop)
                    .run(),
                Err(e) => log::error!("failed to start capture: {e:#}"),
            }
        })?;

    Ok(CaptureHandle {
        stop,
        handle: Some(handle),
    })
}

/// Handle to a [`CaptureLoop`] running on a background thread.
///
/// Dropping the handle stops the loop and joins the thread. If the thread has panicked, the panic
/// is forwarded to the thread dropping the handle; use [`CaptureHandle::join`] to handle it
/// instead.
pub struct CaptureHandle {
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Asks the loop to exit after its current iteration. Does not wait.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Returns `true` once the capture thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stops the loop and waits for the thread to exit.
    ///
    /// Returns the panic payload if the capture thread panicked.
    pub fn join(mut self) -> thread::Result<()> {
        self.stop();
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }

    fn wait_for_exit(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
        self.wait_for_exit();
    }
}

/// Returns the message of a panic payload, if it carries one.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
