use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;

use crate::error::EngineError;

/// Pointer actions produced by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Move { x: i32, y: i32 },
    Click,
    DoubleClick,
    MouseDown,
    MouseUp,
    RightClick,
    /// Positive scrolls up.
    ScrollBy { delta: f32 },
    ScrollStop,
}

impl Action {
    pub fn is_continuous(&self) -> bool {
        matches!(self, Self::Move { .. } | Self::ScrollBy { .. })
    }
}

/// The OS pointer interface.
pub trait PointerSink {
    fn move_to(&mut self, x: i32, y: i32) -> Result<()>;
    fn click(&mut self) -> Result<()>;
    fn double_click(&mut self) -> Result<()>;
    fn mouse_down(&mut self) -> Result<()>;
    fn mouse_up(&mut self) -> Result<()>;
    fn right_click(&mut self) -> Result<()>;
    /// Wheel steps, positive is up.
    fn scroll_by(&mut self, steps: i32) -> Result<()>;
}

impl<S: PointerSink + ?Sized> PointerSink for &mut S {
    fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        (**self).move_to(x, y)
    }
    fn click(&mut self) -> Result<()> {
        (**self).click()
    }
    fn double_click(&mut self) -> Result<()> {
        (**self).double_click()
    }
    fn mouse_down(&mut self) -> Result<()> {
        (**self).mouse_down()
    }
    fn mouse_up(&mut self) -> Result<()> {
        (**self).mouse_up()
    }
    fn right_click(&mut self) -> Result<()> {
        (**self).right_click()
    }
    fn scroll_by(&mut self, steps: i32) -> Result<()> {
        (**self).scroll_by(steps)
    }
}

/// Forwards actions to a sink, one continuous action per frame, without
/// repeating button transitions the sink has already seen.
pub struct ActionEmitter<S> {
    sink: S,
    button_down: bool,
    last_pos: Option<(i32, i32)>,
    scroll_acc: f32,
    scroll_step: f32,
    moved_this_frame: bool,
    scrolled_this_frame: bool,
}

impl<S: PointerSink> ActionEmitter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            button_down: false,
            last_pos: None,
            scroll_acc: 0.0,
            scroll_step: 0.01,
            moved_this_frame: false,
            scrolled_this_frame: false,
        }
    }

    pub fn set_scroll_step(&mut self, step: f32) {
        if step > 0.0 {
            self.scroll_step = step;
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[cfg(test)]
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn button_down(&self) -> bool {
        self.button_down
    }

    pub fn begin_frame(&mut self) {
        self.moved_this_frame = false;
        self.scrolled_this_frame = false;
    }

    /// Delivers in order and returns the actions that reached the sink or
    /// were absorbed into the scroll accumulator. Stops at the first failure.
    pub fn deliver(&mut self, actions: &[Action]) -> Result<Vec<Action>, EngineError> {
        let mut delivered = Vec::with_capacity(actions.len());
        for &action in actions {
            if self.emit(action)? {
                delivered.push(action);
            }
        }
        Ok(delivered)
    }

    /// `Ok(false)` when the action was dropped as redundant.
    pub fn emit(&mut self, action: Action) -> Result<bool, EngineError> {
        let failed = |source| EngineError::ActionDeliveryFailed { action, source };

        match action {
            Action::Move { x, y } => {
                if self.moved_this_frame || self.last_pos == Some((x, y)) {
                    return Ok(false);
                }
                self.sink.move_to(x, y).map_err(failed)?;
                self.last_pos = Some((x, y));
                self.moved_this_frame = true;
            }
            Action::Click => self.sink.click().map_err(failed)?,
            Action::DoubleClick => self.sink.double_click().map_err(failed)?,
            Action::RightClick => self.sink.right_click().map_err(failed)?,
            Action::MouseDown => {
                if self.button_down {
                    return Ok(false);
                }
                self.sink.mouse_down().map_err(failed)?;
                self.button_down = true;
            }
            Action::MouseUp => {
                if !self.button_down {
                    return Ok(false);
                }
                self.sink.mouse_up().map_err(failed)?;
                self.button_down = false;
            }
            Action::ScrollBy { delta } => {
                if self.scrolled_this_frame {
                    return Ok(false);
                }
                let acc = self.scroll_acc + delta;
                let steps = (acc / self.scroll_step) as i32;
                if steps != 0 {
                    self.sink.scroll_by(steps).map_err(failed)?;
                }
                self.scroll_acc = acc - (steps as f32) * self.scroll_step;
                self.scrolled_this_frame = true;
            }
            Action::ScrollStop => {
                self.scroll_acc = 0.0;
            }
        }
        Ok(true)
    }

    /// Forces the button up if a press is still outstanding.
    pub fn release_all(&mut self) -> Result<(), EngineError> {
        if self.button_down {
            warn!("releasing button left down");
            self.emit(Action::MouseUp)?;
        }
        self.scroll_acc = 0.0;
        Ok(())
    }
}

pub struct UinputSink {
    linux: Option<Box<LinuxUinput>>,
}

impl UinputSink {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create(width, height)?;
            return Ok(Self {
                linux: Some(Box::new(dev)),
            });
        }
        #[allow(unreachable_code)]
        {
            let _ = (width, height);
            warn!("uinput not available; running in NO-OP mode");
            Ok(Self { linux: None })
        }
    }

    pub fn noop() -> Self {
        Self { linux: None }
    }

    pub fn is_noop(&self) -> bool {
        self.linux.is_none()
    }
}

impl PointerSink for UinputSink {
    fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            return dev.move_abs(x, y);
        }
        debug!("noop: move {x},{y}");
        Ok(())
    }

    fn click(&mut self) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            return dev.click_left();
        }
        debug!("noop: click");
        Ok(())
    }

    fn double_click(&mut self) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.click_left()?;
            return dev.click_left();
        }
        debug!("noop: double click");
        Ok(())
    }

    fn mouse_down(&mut self) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            return dev.left(1);
        }
        debug!("noop: mouse down");
        Ok(())
    }

    fn mouse_up(&mut self) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            return dev.left(0);
        }
        debug!("noop: mouse up");
        Ok(())
    }

    fn right_click(&mut self) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            return dev.click_right();
        }
        debug!("noop: right click");
        Ok(())
    }

    fn scroll_by(&mut self, steps: i32) -> Result<()> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            return dev.scroll_vertical(steps);
        }
        debug!("noop: scroll {steps}");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create(width: u32, height: u32) -> Result<Self> {
        use uinput::event::{absolute, controller::Mouse, relative};

        let max_x = width.saturating_sub(1).max(1) as i32;
        let max_y = height.saturating_sub(1).max(1) as i32;

        let dev = uinput::default()?
            .name("aircursor virtual pointer")?
            // absolute axes sized to the screen so move_to lands on pixels
            .event(absolute::Position::X)?
            .min(0)
            .max(max_x)
            .event(absolute::Position::Y)?
            .min(0)
            .max(max_y)
            .event(relative::Wheel::Vertical)?
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .create()?;

        info!("uinput: created virtual pointer {max_x}x{max_y}");
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<()> {
        self.dev.synchronize()?;
        Ok(())
    }

    fn move_abs(&mut self, x: i32, y: i32) -> Result<()> {
        use uinput::event::absolute::Position;
        self.dev.send(Position::X, x)?;
        self.dev.send(Position::Y, y)?;
        self.sync()
    }

    fn left(&mut self, value: i32) -> Result<()> {
        use uinput::event::controller::Mouse;
        self.dev.send(Mouse::Left, value)?;
        self.sync()
    }

    fn click_left(&mut self) -> Result<()> {
        self.left(1)?;
        self.left(0)
    }

    fn click_right(&mut self) -> Result<()> {
        use uinput::event::controller::Mouse;
        self.dev.send(Mouse::Right, 1)?;
        self.sync()?;
        self.dev.send(Mouse::Right, 0)?;
        self.sync()
    }

    fn scroll_vertical(&mut self, steps: i32) -> Result<()> {
        use uinput::event::relative::Wheel;
        self.dev.send(Wheel::Vertical, steps)?;
        self.sync()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::anyhow;

    /// Records every sink call; calls named in `failing` return an error.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub calls: Vec<String>,
        pub failing: Vec<&'static str>,
    }

    impl RecordingSink {
        fn record(&mut self, name: &'static str, call: String) -> Result<()> {
            if self.failing.contains(&name) {
                return Err(anyhow!("{name} rejected"));
            }
            self.calls.push(call);
            Ok(())
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.calls.iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    impl PointerSink for RecordingSink {
        fn move_to(&mut self, x: i32, y: i32) -> Result<()> {
            self.record("move", format!("move {x} {y}"))
        }
        fn click(&mut self) -> Result<()> {
            self.record("click", "click".into())
        }
        fn double_click(&mut self) -> Result<()> {
            self.record("double", "double".into())
        }
        fn mouse_down(&mut self) -> Result<()> {
            self.record("down", "down".into())
        }
        fn mouse_up(&mut self) -> Result<()> {
            self.record("up", "up".into())
        }
        fn right_click(&mut self) -> Result<()> {
            self.record("right", "right".into())
        }
        fn scroll_by(&mut self, steps: i32) -> Result<()> {
            self.record("scroll", format!("scroll {steps}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    fn emitter() -> ActionEmitter<RecordingSink> {
        ActionEmitter::new(RecordingSink::default())
    }

    #[test]
    fn one_move_per_frame_and_no_repeat_pixel() {
        let mut e = emitter();
        e.begin_frame();
        let out = e
            .deliver(&[Action::Move { x: 1, y: 1 }, Action::Move { x: 2, y: 2 }])
            .unwrap();
        assert_eq!(out, vec![Action::Move { x: 1, y: 1 }]);

        e.begin_frame();
        assert!(!e.emit(Action::Move { x: 1, y: 1 }).unwrap());
        e.begin_frame();
        assert!(e.emit(Action::Move { x: 3, y: 1 }).unwrap());
        assert_eq!(e.sink().calls, vec!["move 1 1", "move 3 1"]);
    }

    #[test]
    fn button_transitions_are_not_repeated() {
        let mut e = emitter();
        assert!(e.emit(Action::MouseUp).is_ok_and(|sent| !sent));
        assert!(e.emit(Action::MouseDown).unwrap());
        assert!(!e.emit(Action::MouseDown).unwrap());
        assert!(e.button_down());
        assert!(e.emit(Action::MouseUp).unwrap());
        assert!(!e.emit(Action::MouseUp).unwrap());
        assert_eq!(e.sink().calls, vec!["down", "up"]);
    }

    #[test]
    fn scroll_accumulates_into_whole_steps() {
        let mut e = emitter();
        e.set_scroll_step(0.01);
        for _ in 0..3 {
            e.begin_frame();
            e.emit(Action::ScrollBy { delta: 0.004 }).unwrap();
        }
        // 0.012 accumulated, one step out, remainder kept
        assert_eq!(e.sink().calls, vec!["scroll 1"]);

        e.begin_frame();
        e.emit(Action::ScrollBy { delta: -0.035 }).unwrap();
        assert_eq!(e.sink().calls.last().map(String::as_str), Some("scroll -3"));

        e.emit(Action::ScrollStop).unwrap();
        e.begin_frame();
        e.emit(Action::ScrollBy { delta: 0.009 }).unwrap();
        assert_eq!(e.sink().count("scroll"), 2);
    }

    #[test]
    fn failed_delivery_does_not_advance_button_state() {
        let mut e = ActionEmitter::new(RecordingSink {
            failing: vec!["down"],
            ..Default::default()
        });
        let err = e.emit(Action::MouseDown).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ActionDeliveryFailed {
                action: Action::MouseDown,
                ..
            }
        ));
        assert!(!e.button_down());
    }

    #[test]
    fn release_all_lifts_a_held_button() {
        let mut e = emitter();
        e.emit(Action::MouseDown).unwrap();
        e.release_all().unwrap();
        assert!(!e.button_down());
        e.release_all().unwrap();
        assert_eq!(e.sink().calls, vec!["down", "up"]);
    }

    #[test]
    fn noop_sink_accepts_everything() {
        let mut s = UinputSink::noop();
        assert!(s.is_noop());
        s.move_to(10, 10).unwrap();
        s.double_click().unwrap();
        s.scroll_by(-2).unwrap();
    }
}
