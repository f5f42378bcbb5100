use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::Serialize;
use std::{
    fs,
    io::{BufRead, BufReader},
    os::unix::net::UnixListener,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender, TryRecvError},
    },
    thread,
    time::Duration,
};

use crate::actions::{Action, PointerSink, UinputSink};
use crate::config::{Profile, SessionConfig};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::input::{self, FrameReceiver, Recv};
use crate::landmarks::LandmarkFrame;

const FRAME_QUEUE: usize = 4;
const POLL: Duration = Duration::from_millis(5);

pub enum PipelineCmd {
    UpdateProfile(Profile),
    Pause,
    Resume,
    Shutdown,
}

/// What `status` reports about the tracking thread.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackingStatus {
    pub connected: bool,
    pub tracking: bool,
    pub paused: bool,
    pub pointer_state: &'static str,
    pub state_since_ms: Option<u64>,
    pub last_action: Option<Action>,
    pub button_down: bool,
    pub frames: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub noop_sink: bool,
}

pub struct TrackingThread {
    tx: Sender<PipelineCmd>,
    status: Arc<Mutex<TrackingStatus>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TrackingThread {
    pub fn start(profile: Profile, frames_sock: &Path) -> Result<Self> {
        if frames_sock.exists() {
            let _ = fs::remove_file(frames_sock);
        }
        let listener = UnixListener::bind(frames_sock)
            .with_context(|| format!("failed to bind {}", frames_sock.display()))?;
        listener.set_nonblocking(true)?;
        info!("tracking: waiting for perception on {}", frames_sock.display());

        let (tx, rx) = mpsc::channel();
        let status = Arc::new(Mutex::new(TrackingStatus::default()));
        let shared = status.clone();
        let handle = thread::spawn(move || {
            if let Err(e) = run_tracking(profile, listener, rx, shared) {
                error!("tracking thread failed: {e:#}");
            }
        });
        Ok(Self {
            tx,
            status,
            handle: Some(handle),
        })
    }

    pub fn status(&self) -> Arc<Mutex<TrackingStatus>> {
        self.status.clone()
    }

    pub fn send(&self, cmd: PipelineCmd) {
        if self.tx.send(cmd).is_err() {
            warn!("tracking thread is gone");
        }
    }

    /// Stops the engine and waits for the thread to exit.
    pub fn shutdown(mut self) {
        self.send(PipelineCmd::Shutdown);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn open_sink(cfg: &SessionConfig) -> UinputSink {
    UinputSink::new(cfg.screen.width, cfg.screen.height).unwrap_or_else(|e| {
        warn!("uinput unavailable ({e:#}); pointer actions are not delivered");
        UinputSink::noop()
    })
}

fn run_tracking(
    mut profile: Profile,
    listener: UnixListener,
    rx: Receiver<PipelineCmd>,
    status: Arc<Mutex<TrackingStatus>>,
) -> Result<()> {
    let mut engine = Engine::new(open_sink(&profile.session));
    let mut source: Option<FrameReceiver> = None;
    let mut paused = false;
    let mut counters = Counters::default();

    loop {
        match listener.accept() {
            Ok((stream, _)) if source.is_none() => {
                stream.set_nonblocking(false)?;
                info!("tracking: perception connected");
                source = Some(input::spawn_reader(
                    BufReader::new(stream),
                    FRAME_QUEUE,
                    "perception",
                ));
                if !paused {
                    engine.start(profile.session.clone())?;
                }
            }
            Ok(_) => warn!("tracking: a perception stream is already connected, refusing another"),
            Err(_) => {}
        }

        loop {
            match rx.try_recv() {
                Ok(PipelineCmd::UpdateProfile(p)) => {
                    if p.session.screen != profile.session.screen {
                        warn!("screen settings changed; restart the daemon to resize the pointer device");
                    }
                    profile = p;
                    if engine.is_tracking() && engine.config() != Some(&profile.session) {
                        finish_session(&mut engine);
                        engine.start(profile.session.clone())?;
                    }
                    info!("tracking: profile updated");
                }
                Ok(PipelineCmd::Pause) => {
                    paused = true;
                    finish_session(&mut engine);
                    info!("tracking: paused");
                }
                Ok(PipelineCmd::Resume) => {
                    paused = false;
                    if source.is_some() && !engine.is_tracking() {
                        engine.start(profile.session.clone())?;
                    }
                    info!("tracking: resumed");
                }
                Ok(PipelineCmd::Shutdown) | Err(TryRecvError::Disconnected) => {
                    finish_session(&mut engine);
                    info!("tracking: shut down");
                    return Ok(());
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match source.as_ref().map(|s| s.latest(POLL)) {
            Some(Recv::Frame(frame)) => {
                if engine.is_tracking() {
                    process_frame(&mut engine, &frame, &mut counters);
                }
            }
            Some(Recv::Idle) => {}
            Some(Recv::Closed) => {
                info!("tracking: perception stream closed");
                finish_session(&mut engine);
                source = None;
            }
            None => thread::sleep(POLL),
        }

        if let Ok(mut st) = status.lock() {
            *st = TrackingStatus {
                connected: source.is_some(),
                tracking: engine.is_tracking(),
                paused,
                pointer_state: engine.pointer_state().as_str(),
                state_since_ms: engine.session_state().map(|s| s.entered_at_ms),
                last_action: engine.session_state().and_then(|s| s.last_action),
                button_down: engine.button_held(),
                frames: counters.frames,
                rejected: counters.rejected,
                dropped: source.as_ref().map_or(0, |s| s.dropped()),
                noop_sink: engine.sink().is_noop(),
            };
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames: u64,
    rejected: u64,
}

/// Feeds one frame and logs what could not be applied. Never fatal.
fn process_frame<S: PointerSink>(
    engine: &mut Engine<S>,
    frame: &LandmarkFrame,
    counters: &mut Counters,
) -> Vec<Action> {
    match engine.feed_frame(frame) {
        Ok(actions) => {
            counters.frames += 1;
            actions
        }
        Err(e @ EngineError::ActionDeliveryFailed { .. }) => {
            counters.rejected += 1;
            error!("frame {}: {e:#}", frame.index);
            Vec::new()
        }
        Err(e) => {
            counters.rejected += 1;
            warn!("frame {} skipped: {e}", frame.index);
            Vec::new()
        }
    }
}

fn finish_session<S: PointerSink>(engine: &mut Engine<S>) -> Vec<Action> {
    match engine.stop() {
        Ok(actions) => actions,
        Err(e) => {
            error!("stopping session: {e:#}");
            Vec::new()
        }
    }
}

/// Foreground session over stdin. Ends on EOF, SIGINT or SIGTERM.
pub fn run_foreground(profile: Profile, term: Arc<AtomicBool>) -> Result<()> {
    let mut engine = Engine::new(open_sink(&profile.session));
    engine.start(profile.session)?;
    let source = input::spawn_reader(BufReader::new(std::io::stdin()), FRAME_QUEUE, "stdin");
    let mut counters = Counters::default();

    while !term.load(Ordering::Relaxed) {
        match source.latest(Duration::from_millis(50)) {
            Recv::Frame(frame) => {
                process_frame(&mut engine, &frame, &mut counters);
            }
            Recv::Idle => {}
            Recv::Closed => break,
        }
    }
    finish_session(&mut engine);
    info!(
        "run: {} frames, {} rejected, {} dropped",
        counters.frames,
        counters.rejected,
        source.dropped()
    );
    Ok(())
}

/// Plays a recording through a fresh session, frame by frame, and reports
/// every delivered action to `on_action`. Returns the number of frames read.
pub fn replay_frames<S, R>(
    engine: &mut Engine<S>,
    cfg: SessionConfig,
    reader: R,
    mut on_action: impl FnMut(&LandmarkFrame, &Action),
) -> Result<u64>
where
    S: PointerSink,
    R: BufRead,
{
    engine.start(cfg)?;
    let mut counters = Counters::default();
    let mut read = 0;
    let mut last: Option<LandmarkFrame> = None;
    for frame in input::frames(reader) {
        read += 1;
        for action in process_frame(engine, &frame, &mut counters) {
            on_action(&frame, &action);
        }
        last = Some(frame);
    }
    let tail = finish_session(engine);
    if let Some(frame) = last.as_ref() {
        for action in &tail {
            on_action(frame, action);
        }
    }
    info!("replay: {read} frames, {} rejected", counters.rejected);
    Ok(read)
}

/// `replay` command: prints delivered actions as JSON lines.
pub fn replay_file(profile: Profile, path: PathBuf, dry_run: bool) -> Result<()> {
    let file = fs::File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    let sink = if dry_run {
        UinputSink::noop()
    } else {
        open_sink(&profile.session)
    };
    let mut engine = Engine::new(sink);
    replay_frames(&mut engine, profile.session, BufReader::new(file), |frame, action| {
        match serde_json::to_string(action) {
            Ok(json) => println!("{} {json}", frame.index),
            Err(e) => warn!("cannot encode {action:?}: {e}"),
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::RecordingSink;
    use crate::landmarks::{HandObservation, LandmarkFrame, fixtures};
    use std::io::Cursor;

    fn recording(frames: Vec<LandmarkFrame>) -> Cursor<Vec<u8>> {
        let mut out = String::new();
        for f in frames {
            out.push_str(&serde_json::to_string(&f).unwrap());
            out.push('\n');
        }
        Cursor::new(out.into_bytes())
    }

    fn config() -> SessionConfig {
        let mut cfg = SessionConfig::default();
        cfg.smoothing.alpha = 1.0;
        cfg.timing.hold_to_drag_ms = 80;
        cfg
    }

    #[test]
    fn replay_releases_drag_at_end_of_recording() {
        let frames = (0..5u64)
            .map(|i| fixtures::frame(i + 1, i * 40, fixtures::pinch_hand()))
            .collect();
        let mut engine = Engine::new(RecordingSink::default());
        let mut seen = Vec::new();
        let read = replay_frames(&mut engine, config(), recording(frames), |f, a| {
            seen.push((f.index, *a))
        })
        .unwrap();

        assert_eq!(read, 5);
        assert!(seen.contains(&(4, Action::MouseDown)));
        assert_eq!(seen.last(), Some(&(5, Action::MouseUp)));
        assert!(!engine.is_tracking());
        assert_eq!(engine.sink().count("down"), 1);
        assert_eq!(engine.sink().count("up"), 1);
    }

    #[test]
    fn replay_skips_malformed_hands() {
        let bad = LandmarkFrame {
            index: 2,
            timestamp_ms: 40,
            hands: vec![HandObservation {
                handedness: None,
                landmarks: fixtures::open_hand().into_iter().take(5).collect(),
            }],
        };
        let frames = vec![
            fixtures::frame(1, 0, fixtures::open_hand()),
            bad,
            fixtures::frame(3, 80, fixtures::shifted(fixtures::open_hand(), 0.1, 0.0)),
        ];
        let mut engine = Engine::new(RecordingSink::default());
        let mut moves = 0;
        let read = replay_frames(&mut engine, config(), recording(frames), |_, a| {
            if matches!(a, Action::Move { .. }) {
                moves += 1;
            }
        })
        .unwrap();
        assert_eq!(read, 3);
        assert_eq!(moves, 2);
    }

    #[test]
    fn replay_flushes_pending_click_on_stop() {
        let frames = vec![
            fixtures::frame(1, 0, fixtures::open_hand()),
            fixtures::frame(2, 40, fixtures::pinch_hand()),
            fixtures::frame(3, 80, fixtures::pinch_hand()),
            fixtures::frame(4, 120, fixtures::open_hand()),
        ];
        let mut engine = Engine::new(RecordingSink::default());
        let mut clicks = 0;
        replay_frames(&mut engine, config(), recording(frames), |_, a| {
            if *a == Action::Click {
                clicks += 1;
            }
        })
        .unwrap();
        assert_eq!(clicks, 1);
        assert_eq!(engine.sink().count("click"), 1);
    }
}
