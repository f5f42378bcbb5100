use std::collections::VecDeque;

use log::{debug, info};

use crate::actions::Action;
use crate::config::SessionConfig;
use crate::geometry::{GeometrySnapshot, GestureCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerState {
    #[default]
    Idle,
    Moving,
    ClickPressed,
    Dragging,
    ScrollActive,
    RightClickCooldown,
}

impl PointerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Moving => "moving",
            Self::ClickPressed => "click-pressed",
            Self::Dragging => "dragging",
            Self::ScrollActive => "scroll-active",
            Self::RightClickCooldown => "right-click-cooldown",
        }
    }
}

/// Classifier output for the hand seen in the current frame.
#[derive(Debug, Clone, Copy)]
pub struct HandReading {
    pub snapshot: GeometrySnapshot,
    pub candidate: GestureCandidate,
}

/// Mutable per-session record. Only the state machine writes to it.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub state: PointerState,
    pub entered_at_ms: u64,
    pub last_candidate: GestureCandidate,
    pub last_action: Option<Action>,
    press_streak: u32,
    press_started_ms: u64,
    // single click held back while a second one may still arrive
    pending_click_ms: Option<u64>,
    cooldown_until_ms: u64,
    scroll_anchor_y: Option<f32>,
    fingers_apart_since_ms: Option<u64>,
    last_seen_ms: Option<u64>,
    cursor_history: VecDeque<(f32, f32)>,
}

#[derive(Debug, Clone)]
pub struct GestureStateMachine {
    cfg: SessionConfig,
}

impl GestureStateMachine {
    pub fn new(cfg: SessionConfig) -> Self {
        Self { cfg }
    }

    /// One evaluation for one frame. `hand` is `None` when nothing was detected.
    pub fn advance(
        &self,
        st: &mut EngineState,
        now_ms: u64,
        hand: Option<&HandReading>,
    ) -> Vec<Action> {
        let mut out: Vec<Action> = self.flush_expired_click(st, now_ms).into_iter().collect();

        match hand {
            Some(reading) => self.on_hand(st, now_ms, reading, &mut out),
            None => self.on_hand_lost(st, now_ms, &mut out),
        }

        if let Some(last) = out.last() {
            st.last_action = Some(*last);
        }
        out
    }

    /// Terminal actions for a session that is being torn down. Leaves `st`
    /// reset so no button or scroll stays engaged.
    pub fn finish(&self, st: &mut EngineState) -> Vec<Action> {
        let mut out = Vec::new();
        match st.state {
            PointerState::Dragging => out.push(Action::MouseUp),
            PointerState::ScrollActive => out.push(Action::ScrollStop),
            _ => {}
        }
        if st.pending_click_ms.take().is_some() {
            out.push(Action::Click);
        }
        *st = EngineState::default();
        out
    }

    fn enter(&self, st: &mut EngineState, next: PointerState, now_ms: u64) {
        if st.state != next {
            debug!(
                "{} -> {} at {now_ms}ms ({})",
                st.state.as_str(),
                next.as_str(),
                st.last_candidate.as_str()
            );
        }
        st.state = next;
        st.entered_at_ms = now_ms;
        if next == PointerState::Idle {
            st.press_streak = 0;
            st.scroll_anchor_y = None;
            st.fingers_apart_since_ms = None;
        }
    }

    /// Releases the held-back single click once its double-click window has
    /// passed. `advance` does this too; callers that must commit the click
    /// separately from the rest of the frame call it first.
    pub fn flush_expired_click(&self, st: &mut EngineState, now_ms: u64) -> Option<Action> {
        let t = st.pending_click_ms?;
        if now_ms.saturating_sub(t) < self.cfg.timing.double_click_ms {
            return None;
        }
        st.pending_click_ms = None;
        st.last_action = Some(Action::Click);
        Some(Action::Click)
    }

    fn register_click(&self, st: &mut EngineState, now_ms: u64, out: &mut Vec<Action>) {
        let window = self.cfg.timing.double_click_ms;
        if window == 0 {
            out.push(Action::Click);
            return;
        }
        match st.pending_click_ms.take() {
            Some(t) if now_ms.saturating_sub(t) < window => out.push(Action::DoubleClick),
            Some(_) => {
                out.push(Action::Click);
                st.pending_click_ms = Some(now_ms);
            }
            None => st.pending_click_ms = Some(now_ms),
        }
    }

    fn cursor(&self, st: &mut EngineState, reading: &HandReading) -> Action {
        let window = self.cfg.smoothing.cursor_window.max(1);
        st.cursor_history.push_back(reading.snapshot.pointer);
        while st.cursor_history.len() > window {
            st.cursor_history.pop_front();
        }
        let n = st.cursor_history.len() as f32;
        let (sx, sy) = st
            .cursor_history
            .iter()
            .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        let (x, y) = self.cfg.screen.to_screen(sx / n, sy / n);
        Action::Move { x, y }
    }

    fn on_hand(
        &self,
        st: &mut EngineState,
        now_ms: u64,
        reading: &HandReading,
        out: &mut Vec<Action>,
    ) {
        st.last_seen_ms = Some(now_ms);
        st.last_candidate = reading.candidate;
        let th = &self.cfg.thresholds;
        let snap = &reading.snapshot;

        match st.state {
            PointerState::Idle => {
                self.enter(st, PointerState::Moving, now_ms);
                out.push(self.cursor(st, reading));
            }
            PointerState::Moving => self.on_moving(st, now_ms, reading, out),
            PointerState::ClickPressed => {
                if snap.press_held(th) {
                    let held_for = now_ms.saturating_sub(st.press_started_ms);
                    if held_for >= self.cfg.timing.hold_to_drag_ms {
                        // a held-back click gets its own frame, the button goes down on the next
                        if st.pending_click_ms.take().is_some() {
                            out.push(Action::Click);
                            return;
                        }
                        info!("drag start after {held_for}ms hold");
                        out.push(Action::MouseDown);
                        self.enter(st, PointerState::Dragging, now_ms);
                    }
                } else {
                    self.register_click(st, now_ms, out);
                    self.enter(st, PointerState::Idle, now_ms);
                }
            }
            PointerState::Dragging => {
                if snap.press_held(th) {
                    out.push(self.cursor(st, reading));
                } else {
                    info!("drag end");
                    out.push(Action::MouseUp);
                    self.enter(st, PointerState::Idle, now_ms);
                }
            }
            PointerState::ScrollActive => {
                if snap.fingers_held_together(th) {
                    st.fingers_apart_since_ms = None;
                    let y = snap.scroll_anchor_y;
                    if let Some(prev) = st.scroll_anchor_y {
                        let dy = y - prev;
                        if dy != 0.0 {
                            // image y grows downward; moving up scrolls positive
                            out.push(Action::ScrollBy {
                                delta: -dy * self.cfg.scroll.gain,
                            });
                        }
                    }
                    st.scroll_anchor_y = Some(y);
                } else {
                    st.scroll_anchor_y = None;
                    let since = *st.fingers_apart_since_ms.get_or_insert(now_ms);
                    if now_ms.saturating_sub(since) > self.cfg.timing.scroll_grace_ms {
                        out.push(Action::ScrollStop);
                        self.enter(st, PointerState::Idle, now_ms);
                    }
                }
            }
            PointerState::RightClickCooldown => {
                if now_ms >= st.cooldown_until_ms {
                    self.enter(st, PointerState::Moving, now_ms);
                }
                out.push(self.cursor(st, reading));
            }
        }
    }

    fn on_moving(
        &self,
        st: &mut EngineState,
        now_ms: u64,
        reading: &HandReading,
        out: &mut Vec<Action>,
    ) {
        let candidate = reading.candidate;

        if candidate.is_press() {
            st.press_streak += 1;
            if st.press_streak == 1 {
                st.press_started_ms = now_ms;
            }
            if st.press_streak >= self.cfg.thresholds.confirm_frames {
                // cursor stays frozen while pressed
                self.enter(st, PointerState::ClickPressed, now_ms);
            } else {
                out.push(self.cursor(st, reading));
            }
            return;
        }
        st.press_streak = 0;

        match candidate {
            GestureCandidate::PinkyWristFlick => {
                info!("right click");
                out.push(Action::RightClick);
                st.cooldown_until_ms = now_ms
                    .saturating_add(self.cfg.timing.right_click_refractory_ms);
                self.enter(st, PointerState::RightClickCooldown, now_ms);
            }
            c if c.is_scroll() => {
                st.scroll_anchor_y = Some(reading.snapshot.scroll_anchor_y);
                st.fingers_apart_since_ms = None;
                self.enter(st, PointerState::ScrollActive, now_ms);
            }
            _ => out.push(self.cursor(st, reading)),
        }
    }

    fn on_hand_lost(&self, st: &mut EngineState, now_ms: u64, out: &mut Vec<Action>) {
        st.press_streak = 0;
        st.last_candidate = GestureCandidate::None;
        let lost_for = st
            .last_seen_ms
            .map_or(u64::MAX, |t| now_ms.saturating_sub(t));
        let expired = lost_for > self.cfg.timing.hand_lost_grace_ms;

        match st.state {
            PointerState::Dragging if expired => {
                info!("hand lost for {lost_for}ms, releasing drag");
                out.push(Action::MouseUp);
                self.enter(st, PointerState::Idle, now_ms);
            }
            PointerState::ScrollActive if expired => {
                out.push(Action::ScrollStop);
                self.enter(st, PointerState::Idle, now_ms);
            }
            PointerState::Dragging | PointerState::ScrollActive => {}
            PointerState::ClickPressed => {
                debug!("hand lost while pressed, press cancelled");
                self.enter(st, PointerState::Idle, now_ms);
            }
            PointerState::RightClickCooldown => {
                if now_ms >= st.cooldown_until_ms {
                    self.enter(st, PointerState::Idle, now_ms);
                }
            }
            PointerState::Moving => self.enter(st, PointerState::Idle, now_ms),
            PointerState::Idle => {}
        }

        if st.state == PointerState::Idle {
            st.cursor_history.clear();
        }
    }
}
