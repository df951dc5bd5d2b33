use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::bail;
use handpose::{
    capture::{self, Backoff, CaptureLoop, CaptureOptions, EmptyDetectionPolicy, Step, StopSignal},
    engine::LandmarkEngine,
    image::{CaptureImage, Frame, RawFrame},
    landmark::{DetectionResult, Landmark, LandmarkSet, NUM_LANDMARKS},
    render::{Backend, Renderer, Vertex},
    resolution::Resolution,
    state::{PipelineState, SharedLandmarkState},
    video::FrameSource,
};

struct FnSource<F>(F);

impl<F: FnMut() -> Option<RawFrame>> FrameSource for FnSource<F> {
    fn try_read_frame(&mut self) -> Option<RawFrame> {
        (self.0)()
    }
}

struct FnEngine<F>(F);

impl<F: FnMut(&Frame) -> anyhow::Result<DetectionResult>> LandmarkEngine for FnEngine<F> {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<DetectionResult> {
        (self.0)(frame)
    }
}

fn source<F: FnMut() -> Option<RawFrame>>(f: F) -> FnSource<F> {
    FnSource(f)
}

fn engine<F>(f: F) -> FnEngine<F>
where
    F: FnMut(&Frame) -> anyhow::Result<DetectionResult>,
{
    FnEngine(f)
}

fn frame() -> RawFrame {
    Frame::from_fn(8, 6, |x, y| [x as u8 * 10, y as u8 * 10, 99]).into()
}

fn hand(x: f32) -> LandmarkSet {
    LandmarkSet::new([Landmark::new(x, 0.5, 0.0); NUM_LANDMARKS])
}

fn one_hand(x: f32) -> DetectionResult {
    DetectionResult::new(vec![hand(x)])
}

fn options() -> CaptureOptions {
    CaptureOptions::default().backoff(Backoff::none())
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "timed out waiting for condition"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn absent_frames_are_retried() {
    let mut calls = 0;
    let source = source(move || {
        calls += 1;
        (calls > 5).then(frame)
    });
    let mut inferences = 0;
    let engine = engine(|_| {
        inferences += 1;
        Ok(one_hand(0.5))
    });

    let shared = Arc::new(SharedLandmarkState::new());
    let mut capture = CaptureLoop::new(source, engine, shared.clone(), options());
    for _ in 0..5 {
        assert_eq!(capture.step(), Step::NoFrame);
        assert!(!shared.is_dirty());
        assert_eq!(shared.state(), PipelineState::Uninitialized);
    }
    assert_eq!(capture.step(), Step::Published(1));
    assert!(shared.is_dirty());
    assert_eq!(shared.state(), PipelineState::Tracking);

    drop(capture);
    assert_eq!(inferences, 1);
}

#[test]
fn stop_during_capture_skips_inference() {
    let stop = StopSignal::new();
    let source = source({
        let stop = stop.clone();
        move || {
            stop.stop();
            Some(frame())
        }
    });
    let inferences = AtomicUsize::new(0);
    let engine = engine(|_| {
        inferences.fetch_add(1, Ordering::SeqCst);
        Ok(one_hand(0.5))
    });

    let shared = Arc::new(SharedLandmarkState::new());
    let mut capture =
        CaptureLoop::new(source, engine, shared.clone(), options()).with_stop_signal(stop);
    assert_eq!(capture.step(), Step::Stopped);
    assert_eq!(capture.step(), Step::Stopped);
    drop(capture);

    assert_eq!(inferences.load(Ordering::SeqCst), 0);
    assert!(!shared.is_dirty());
}

#[test]
fn run_exits_when_stopped() {
    let stop = StopSignal::new();
    let source = source(|| Some(frame()));
    let mut inferences = 0;
    let engine = engine({
        let stop = stop.clone();
        move |_| {
            inferences += 1;
            if inferences == 3 {
                stop.stop();
            }
            Ok(one_hand(inferences as f32 / 10.0))
        }
    });

    let shared = Arc::new(SharedLandmarkState::new());
    CaptureLoop::new(source, engine, shared.clone(), options())
        .with_stop_signal(stop)
        .run();

    assert_eq!(shared.state(), PipelineState::Stopped);
    let snapshot = shared.read();
    assert_eq!(snapshot.version(), 3);
    let x = snapshot.value().unwrap().first().unwrap().landmarks()[0].x;
    assert_eq!(x, 0.3);
}

#[test]
fn inference_errors_count_as_empty_frames() {
    let mut calls = 0;
    let engine = engine(move |_| {
        calls += 1;
        match calls {
            1 => bail!("session lost"),
            2 => panic!("engine bug"),
            _ => Ok(one_hand(0.5)),
        }
    });

    let shared = Arc::new(SharedLandmarkState::new());
    let mut capture =
        CaptureLoop::new(source(|| Some(frame())), engine, shared.clone(), options());

    assert_eq!(capture.step(), Step::Published(0));
    assert_eq!(shared.state(), PipelineState::NoHandVisible);
    assert_eq!(capture.step(), Step::Published(0));
    assert_eq!(capture.step(), Step::Published(1));
    assert_eq!(shared.state(), PipelineState::Tracking);
}

#[test]
fn keep_last_policy_retains_landmarks() {
    let mut results = vec![DetectionResult::empty(), one_hand(0.25)];
    let engine = engine(move |_| Ok(results.pop().unwrap_or_default()));

    let shared = Arc::new(SharedLandmarkState::new());
    let options = options().empty_policy(EmptyDetectionPolicy::KeepLast);
    let mut capture = CaptureLoop::new(source(|| Some(frame())), engine, shared.clone(), options);

    assert_eq!(capture.step(), Step::Published(1));
    shared.read();
    assert_eq!(capture.step(), Step::KeptLast);
    assert_eq!(shared.state(), PipelineState::Stale);
    assert!(!shared.is_dirty());
    assert_eq!(shared.latest().unwrap().first().unwrap().landmarks()[0].x, 0.25);

    assert_eq!(capture.step(), Step::KeptLast);
    assert_eq!(shared.state(), PipelineState::Stale);
}

#[test]
fn clear_policy_publishes_empty_results() {
    let mut results = vec![DetectionResult::empty(), one_hand(0.25)];
    let engine = engine(move |_| Ok(results.pop().unwrap_or_default()));

    let shared = Arc::new(SharedLandmarkState::new());
    let mut capture =
        CaptureLoop::new(source(|| Some(frame())), engine, shared.clone(), options());

    assert_eq!(capture.step(), Step::Published(1));
    assert_eq!(capture.step(), Step::Published(0));
    assert_eq!(shared.state(), PipelineState::NoHandVisible);
    assert!(shared.read().value().unwrap().is_empty());
}

#[test]
fn capture_image_is_published_before_inference() {
    let shared = Arc::new(SharedLandmarkState::new());
    let engine = engine({
        let shared = shared.clone();
        move |frame| {
            let image = shared.read_frame();
            assert!(image.changed());
            let image = image.value().unwrap();
            assert_eq!(image.resolution(), frame.resolution());
            assert_eq!(&image.data()[..4], &[0, 0, 99, 255]);
            Ok(DetectionResult::empty())
        }
    });

    let mut capture =
        CaptureLoop::new(source(|| Some(frame())), engine, shared.clone(), options());
    assert_eq!(capture.step(), Step::Published(0));
}

#[test]
fn spawned_loop_stops_on_drop() {
    let inferences = Arc::new(AtomicUsize::new(0));
    let engine = engine({
        let inferences = inferences.clone();
        move |_| {
            inferences.fetch_add(1, Ordering::SeqCst);
            Ok(one_hand(0.5))
        }
    });

    let shared = Arc::new(SharedLandmarkState::new());
    let handle = CaptureLoop::new(source(|| Some(frame())), engine, shared.clone(), options())
        .spawn()
        .unwrap();
    wait_until(|| inferences.load(Ordering::SeqCst) >= 3);
    assert!(!handle.is_finished());

    drop(handle);
    assert_eq!(shared.state(), PipelineState::Stopped);
    let count = inferences.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(inferences.load(Ordering::SeqCst), count);
}

#[test]
fn stop_interrupts_backoff() {
    let shared = Arc::new(SharedLandmarkState::new());
    let options = CaptureOptions::default()
        .backoff(Backoff::new(Duration::from_secs(60), Duration::from_secs(60)));
    let attempts = Arc::new(AtomicUsize::new(0));
    let source = source({
        let attempts = attempts.clone();
        move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            None
        }
    });
    let engine = engine(|_| Ok(DetectionResult::empty()));

    let handle = CaptureLoop::new(source, engine, shared.clone(), options)
        .spawn()
        .unwrap();
    // The first retry is immediate, the second one waits a full minute.
    wait_until(|| attempts.load(Ordering::SeqCst) >= 2);

    let start = Instant::now();
    handle.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(30));
    assert_eq!(shared.state(), PipelineState::Stopped);
}

#[test]
fn source_panic_is_retried() {
    let mut calls = 0;
    let source = source(move || {
        calls += 1;
        if calls == 1 {
            panic!("camera driver bug");
        }
        Some(frame())
    });
    let engine = engine(|_| Ok(one_hand(0.5)));
    let shared = Arc::new(SharedLandmarkState::new());
    let mut capture = CaptureLoop::new(source, engine, shared.clone(), options());

    assert_eq!(capture.step(), Step::NoFrame);
    assert_eq!(capture.step(), Step::Published(1));
    assert_eq!(shared.state(), PipelineState::Tracking);
}

#[test]
fn spawned_loop_survives_source_panic() {
    let calls = Arc::new(AtomicUsize::new(0));
    let source = source({
        let calls = calls.clone();
        move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("camera driver bug");
            }
            Some(frame())
        }
    });
    let engine = engine(|_| Ok(one_hand(0.5)));
    let shared = Arc::new(SharedLandmarkState::new());

    let handle = CaptureLoop::new(source, engine, shared.clone(), options())
        .spawn()
        .unwrap();
    wait_until(|| shared.state() == PipelineState::Tracking);
    assert!(!handle.is_finished());

    assert!(handle.join().is_ok());
    assert_eq!(shared.state(), PipelineState::Stopped);
}

type FnPtrSource = FnSource<fn() -> Option<RawFrame>>;
type FnPtrEngine = FnEngine<fn(&Frame) -> anyhow::Result<DetectionResult>>;

fn failing_init() -> anyhow::Result<(FnPtrSource, FnPtrEngine)> {
    bail!("no camera")
}

#[test]
fn failed_init_stops_pipeline() {
    let shared = Arc::new(SharedLandmarkState::new());
    let handle = capture::spawn_with(shared.clone(), options(), failing_init).unwrap();

    wait_until(|| handle.is_finished());
    assert!(handle.join().is_ok());
    assert_eq!(shared.state(), PipelineState::Stopped);
}

#[test]
fn init_panic_is_returned_by_join() {
    let shared = Arc::new(SharedLandmarkState::new());
    let init = || -> anyhow::Result<(FnPtrSource, FnPtrEngine)> { panic!("driver bug") };
    let handle = capture::spawn_with(shared.clone(), options(), init).unwrap();

    wait_until(|| handle.is_finished());
    assert_eq!(shared.state(), PipelineState::Stopped);
    let payload = handle.join().unwrap_err();
    assert_eq!(capture::panic_message(&*payload), "driver bug");
}

#[test]
fn spawn_with_builds_on_capture_thread() {
    let shared = Arc::new(SharedLandmarkState::new());
    let handle = capture::spawn_with(shared.clone(), options(), || {
        assert_eq!(thread::current().name(), Some("capture"));
        Ok((
            source(|| Some(frame())),
            engine(|_| Ok(one_hand(0.75))),
        ))
    })
    .unwrap();

    wait_until(|| shared.state() == PipelineState::Tracking);
    handle.stop();
    wait_until(|| handle.is_finished());
    drop(handle);
    assert_eq!(shared.state(), PipelineState::Stopped);
}

/// Keeps GPU state in memory.
#[derive(Default)]
struct RecordingBackend {
    uploads: usize,
    textures: Vec<Resolution>,
    /// Points and background resolution passed to the last draw call.
    last_draw: Option<(Vec<Vertex>, Option<Resolution>)>,
}

impl Backend for RecordingBackend {
    type Points = Vec<Vertex>;
    type Texture = Resolution;

    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn create_points(&mut self, capacity: usize) -> anyhow::Result<Vec<Vertex>> {
        Ok(vec![Vertex::default(); capacity])
    }

    fn write_points(&mut self, points: &mut Vec<Vertex>, vertices: &[Vertex]) {
        self.uploads += 1;
        points[..vertices.len()].copy_from_slice(vertices);
    }

    fn create_texture(&mut self, res: Resolution) -> anyhow::Result<Resolution> {
        Ok(res)
    }

    fn write_texture(&mut self, texture: &mut Resolution, image: &CaptureImage) {
        assert_eq!(*texture, image.resolution());
        self.textures.push(*texture);
    }

    fn draw(
        &mut self,
        _target: Resolution,
        background: Option<&Resolution>,
        points: &Vec<Vertex>,
        count: u32,
    ) -> anyhow::Result<()> {
        self.last_draw = Some((points[..count as usize].to_vec(), background.copied()));
        Ok(())
    }
}

#[test]
fn renderer_sees_latest_capture() {
    let mut x = 0.0;
    let engine = engine(move |_| {
        x += 0.125;
        Ok(one_hand(x))
    });
    let shared = Arc::new(SharedLandmarkState::new());
    let mut capture =
        CaptureLoop::new(source(|| Some(frame())), engine, shared.clone(), options());
    let mut renderer = Renderer::new(RecordingBackend::default(), shared.clone());

    for _ in 0..4 {
        capture.step();
    }
    let stats = renderer.on_frame(320, 240);
    assert_eq!(stats.points, NUM_LANDMARKS as u32);
    assert!(stats.geometry_uploaded);
    assert!(stats.texture_updated);

    let backend = renderer.backend();
    assert_eq!(backend.uploads, 1);
    assert_eq!(backend.textures, [Resolution::new(8, 6)]);
    let (points, background) = backend.last_draw.clone().unwrap();
    assert_eq!(points[0], Vertex::new(0.5, 0.5));
    assert_eq!(background, Some(Resolution::new(8, 6)));
}

#[test]
fn random_interleavings_upload_latest_result() {
    let shared = Arc::new(SharedLandmarkState::new());
    let mut renderer = Renderer::new(RecordingBackend::default(), shared.clone());
    let mut rng = fastrand::Rng::with_seed(0x5eed);

    let mut last = None;
    let mut renders = 0;
    for _ in 0..500 {
        if rng.bool() {
            let x = rng.f32();
            if rng.u8(..8) == 0 {
                shared.publish(DetectionResult::empty());
                last = Some(None);
            } else {
                shared.publish(one_hand(x));
                last = Some(Some(x));
            }
        } else {
            let before = renderer.backend().uploads;
            renderer.on_frame(64, 64);
            renders += 1;
            assert!(renderer.backend().uploads <= before + 1);

            let (points, _) = renderer.backend().last_draw.clone().unwrap();
            match last {
                Some(Some(x)) => {
                    assert_eq!(points.len(), NUM_LANDMARKS);
                    assert_eq!(points[0], Vertex::new(x, 0.5));
                }
                Some(None) | None => assert!(points.is_empty()),
            }
        }
    }
    assert!(renders > 0);
}
