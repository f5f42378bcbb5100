//! Tracking session facade: one frame in, the delivered pointer actions out.
//!
//! The engine owns every piece of per-session state. Nothing is global, so
//! independent sessions are just independent `Engine` values.

use anyhow::Result;
use log::{debug, info, warn};

use crate::actions::{Action, ActionEmitter, PointerSink};
use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::geometry::GeometryClassifier;
use crate::gestures::{EngineState, GestureStateMachine, HandReading, PointerState};
use crate::landmarks::LandmarkFrame;
use crate::smoother::LandmarkSmoother;

struct Session {
    config: SessionConfig,
    smoother: LandmarkSmoother,
    classifier: GeometryClassifier,
    machine: GestureStateMachine,
    state: EngineState,
    last_index: Option<u64>,
}

impl Session {
    fn new(config: SessionConfig) -> Self {
        Self {
            smoother: LandmarkSmoother::new(config.smoothing.alpha),
            classifier: GeometryClassifier::new(config.thresholds.clone()),
            machine: GestureStateMachine::new(config.clone()),
            state: EngineState::default(),
            last_index: None,
            config,
        }
    }
}

pub struct Engine<S> {
    emitter: ActionEmitter<S>,
    session: Option<Session>,
}

impl<S: PointerSink> Engine<S> {
    pub fn new(sink: S) -> Self {
        Self {
            emitter: ActionEmitter::new(sink),
            session: None,
        }
    }

    /// Begins a tracking session. A running session is stopped first.
    pub fn start(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        if self.session.is_some() {
            if let Err(e) = self.stop() {
                warn!("previous session did not stop cleanly: {e}");
            }
        }
        self.emitter.set_scroll_step(config.scroll.step);
        self.session = Some(Session::new(config));
        info!("tracking started");
        Ok(())
    }

    /// Ends the session, releasing any held button and flushing a pending
    /// click. Calling it while idle does nothing.
    pub fn stop(&mut self) -> Result<Vec<Action>, EngineError> {
        let Some(mut session) = self.session.take() else {
            return Ok(Vec::new());
        };
        let actions = session.machine.finish(&mut session.state);
        self.emitter.begin_frame();
        let delivered = self.emitter.deliver(&actions);
        let released = self.emitter.release_all();
        info!("tracking stopped");
        let delivered = delivered?;
        released?;
        Ok(delivered)
    }

    /// Runs one frame through smoothing, classification and the state
    /// machine. The session state only moves forward when every resulting
    /// action reached the sink.
    pub fn feed_frame(&mut self, frame: &LandmarkFrame) -> Result<Vec<Action>, EngineError> {
        let session = self.session.as_mut().ok_or(EngineError::NotTracking)?;

        if session.last_index.is_some_and(|last| frame.index <= last) {
            debug!("frame {} is not newer than the last one, skipped", frame.index);
            return Ok(Vec::new());
        }

        let mut smoother = session.smoother.clone();
        let reading = match frame.primary_hand() {
            Ok(hand) => {
                let smoothed = smoother.smooth(&hand.landmarks)?;
                let (snapshot, candidate) = session.classifier.classify(&smoothed);
                debug!(
                    "frame {}: {} pinch {:.2} ok {:.2} pinky {:.2} fingers {:.2} (ref {:.3})",
                    frame.index,
                    candidate.as_str(),
                    snapshot.pinch_distance,
                    snapshot.ok_distance,
                    snapshot.pinky_wrist_distance,
                    snapshot.index_middle_distance,
                    snapshot.reference
                );
                Some(HandReading {
                    snapshot,
                    candidate,
                })
            }
            Err(EngineError::HandLost { frame }) => {
                debug!("no hand in frame {frame}");
                None
            }
            Err(e) => return Err(e),
        };

        let mut next = session.state.clone();
        self.emitter.begin_frame();

        // an expired click is committed alone, so a failure later in the
        // frame cannot send it twice
        let mut delivered = Vec::new();
        if let Some(click) = session
            .machine
            .flush_expired_click(&mut next, frame.timestamp_ms)
        {
            delivered = self.emitter.deliver(&[click])?;
            session.state = next.clone();
        }

        let actions = session
            .machine
            .advance(&mut next, frame.timestamp_ms, reading.as_ref());
        delivered.extend(self.emitter.deliver(&actions)?);

        if reading.is_none() && next.state == PointerState::Idle {
            smoother.reset();
        }
        session.smoother = smoother;
        session.state = next;
        session.last_index = Some(frame.index);

        for action in delivered.iter().filter(|a| !a.is_continuous()) {
            debug!("frame {}: {action:?}", frame.index);
        }
        Ok(delivered)
    }

    pub fn is_tracking(&self) -> bool {
        self.session.is_some()
    }

    pub fn pointer_state(&self) -> PointerState {
        self.session
            .as_ref()
            .map_or(PointerState::Idle, |s| s.state.state)
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.session.as_ref().map(|s| &s.config)
    }

    /// Per-session record, `None` while not tracking.
    pub fn session_state(&self) -> Option<&EngineState> {
        self.session.as_ref().map(|s| &s.state)
    }

    pub fn button_held(&self) -> bool {
        self.emitter.button_down()
    }

    pub fn sink(&self) -> &S {
        self.emitter.sink()
    }

    #[cfg(test)]
    fn sink_mut(&mut self) -> &mut S {
        self.emitter.sink_mut()
    }
}
