use anyhow::{Result, anyhow};

use crate::actions::{Action, ActionEmitter, PointerSink};

/// Parses a one-shot action: `click`, `double`, `right`, `scroll:<steps>`
/// or `move:<x>,<y>`.
pub fn parse_action(arg: &str) -> Result<Action> {
    let arg = arg.trim();
    match arg {
        "click" => return Ok(Action::Click),
        "double" => return Ok(Action::DoubleClick),
        "right" => return Ok(Action::RightClick),
        _ => {}
    }

    if let Some(rest) = arg.strip_prefix("scroll:") {
        let steps: i32 = rest
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid scroll steps '{rest}'"))?;
        if steps == 0 {
            return Err(anyhow!("scroll steps must be non-zero"));
        }
        return Ok(Action::ScrollBy {
            delta: steps as f32,
        });
    }
    if let Some(rest) = arg.strip_prefix("move:") {
        let (x, y) = rest
            .split_once(',')
            .ok_or_else(|| anyhow!("usage: move:<x>,<y>"))?;
        let x: i32 = x.trim().parse().map_err(|_| anyhow!("invalid x '{x}'"))?;
        let y: i32 = y.trim().parse().map_err(|_| anyhow!("invalid y '{y}'"))?;
        return Ok(Action::Move { x, y });
    }

    Err(anyhow!("unknown action '{arg}'"))
}

/// Delivers a single action outside any tracking session. Scroll deltas are
/// whole wheel steps here.
pub fn emit_once<S: PointerSink>(sink: S, action: Action) -> Result<()> {
    let mut emitter = ActionEmitter::new(sink);
    emitter.set_scroll_step(1.0);
    emitter.begin_frame();
    emitter.emit(action)?;
    emitter.release_all()?;
    Ok(())
}
