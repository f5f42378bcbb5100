use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Smoothing {
    /// EMA weight of the newest sample; 1.0 disables smoothing.
    pub alpha: f32,
    /// Cursor positions averaged before mapping to the screen.
    pub cursor_window: usize,
}

impl Default for Smoothing {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            cursor_window: 3,
        }
    }
}

/// Distances are fractions of the wrist to middle-MCP length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub pinch: f32,
    pub pinch_release: f32,
    pub ok_hold: f32,
    pub pinky_wrist: f32,
    pub fingers_together: f32,
    pub fingers_release: f32,
    pub scroll_pose_deadzone: f32,
    pub confirm_frames: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pinch: 0.25,
            pinch_release: 0.32,
            ok_hold: 0.30,
            pinky_wrist: 0.65,
            fingers_together: 0.28,
            fingers_release: 0.36,
            scroll_pose_deadzone: 0.15,
            confirm_frames: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub hold_to_drag_ms: u64,
    pub double_click_ms: u64,
    pub right_click_refractory_ms: u64,
    pub scroll_grace_ms: u64,
    pub hand_lost_grace_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            hold_to_drag_ms: 500,
            double_click_ms: 400,
            right_click_refractory_ms: 500,
            scroll_grace_ms: 70,
            hand_lost_grace_ms: 130,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
    /// Normalized camera-space span that maps onto the full screen width.
    pub region_x: [f32; 2],
    pub region_y: [f32; 2],
    /// Perception reports unmirrored camera coordinates.
    pub mirror_x: bool,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            region_x: [0.15, 0.85],
            region_y: [0.15, 0.85],
            mirror_x: true,
        }
    }
}

impl ScreenConfig {
    /// Map a normalized camera position to a clamped screen pixel.
    pub fn to_screen(&self, x: f32, y: f32) -> (i32, i32) {
        let x = if self.mirror_x { 1.0 - x } else { x };
        let u = ((x - self.region_x[0]) / (self.region_x[1] - self.region_x[0])).clamp(0.0, 1.0);
        let v = ((y - self.region_y[0]) / (self.region_y[1] - self.region_y[0])).clamp(0.0, 1.0);
        let px = (u * (self.width.saturating_sub(1)) as f32).round() as i32;
        let py = (v * (self.height.saturating_sub(1)) as f32).round() as i32;
        (px, py)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Scroll units per normalized unit of vertical finger travel.
    pub gain: f32,
    /// Scroll units per emitted wheel step.
    pub step: f32,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            gain: 1.0,
            step: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Display {
    pub show_camera: bool,
}

impl Default for Display {
    fn default() -> Self {
        Self { show_camera: true }
    }
}

/// Everything one tracking session consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub smoothing: Smoothing,
    pub thresholds: Thresholds,
    pub timing: Timing,
    pub screen: ScreenConfig,
    pub scroll: ScrollConfig,
    pub display: Display,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        let s = &self.smoothing;
        if !(s.alpha > 0.0 && s.alpha <= 1.0) {
            return Err(anyhow!("smoothing.alpha must be in (0,1]"));
        }
        if s.cursor_window == 0 {
            return Err(anyhow!("smoothing.cursor_window must be at least 1"));
        }

        let t = &self.thresholds;
        for (name, v) in [
            ("pinch", t.pinch),
            ("ok_hold", t.ok_hold),
            ("pinky_wrist", t.pinky_wrist),
            ("fingers_together", t.fingers_together),
        ] {
            if v <= 0.0 {
                return Err(anyhow!("thresholds.{name} must be positive"));
            }
        }
        if t.pinch_release < t.pinch {
            return Err(anyhow!("thresholds.pinch_release must be >= thresholds.pinch"));
        }
        // an OK press is held by the pinch release distance
        if t.ok_hold > t.pinch_release {
            return Err(anyhow!("thresholds.ok_hold must be <= thresholds.pinch_release"));
        }
        if t.fingers_release < t.fingers_together {
            return Err(anyhow!(
                "thresholds.fingers_release must be >= thresholds.fingers_together"
            ));
        }
        if t.scroll_pose_deadzone < 0.0 {
            return Err(anyhow!("thresholds.scroll_pose_deadzone must not be negative"));
        }
        if t.confirm_frames == 0 {
            return Err(anyhow!("thresholds.confirm_frames must be at least 1"));
        }

        if self.timing.hold_to_drag_ms == 0 {
            return Err(anyhow!("timing.hold_to_drag_ms must be a positive duration"));
        }

        let sc = &self.screen;
        if sc.width == 0 || sc.height == 0 {
            return Err(anyhow!("screen size must be non-zero"));
        }
        for (name, r) in [("region_x", sc.region_x), ("region_y", sc.region_y)] {
            if !(0.0..=1.0).contains(&r[0]) || !(0.0..=1.0).contains(&r[1]) || r[0] >= r[1] {
                return Err(anyhow!(
                    "screen.{name} must be an ordered pair inside [0,1]"
                ));
            }
        }

        if self.scroll.step <= 0.0 {
            return Err(anyhow!("scroll.step must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub meta: Meta,
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl Profile {
    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        profile.session.validate()?;
        Ok(profile)
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().join(".config").join("aircursor"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        let cfgdir = config_dir()?;
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// Loads one named profile without touching the active pointer.
    pub fn load_named(name: &str) -> Result<Profile> {
        let state = Self::load_or_install_default()?;
        load_profile(&state.profiles_dir, name)
    }

    pub fn active_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        // Validate before switching the pointer so a broken profile never becomes active.
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "screen": {
                "width": self.profile.session.screen.width,
                "height": self.profile.session.screen.height,
            },
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input",
                "perception": "stream JSON-lines landmark frames into the frames socket or `aircursor run` stdin"
            }
        })
    }
}

fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Profile::parse(&txt).with_context(|| format!("failed to parse {}", path.display()))
}

fn check_in_input_group() -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines()
        .filter(|line| line.starts_with("input:"))
        .any(|line| {
            line.split(':')
                .nth(3)
                .unwrap_or("")
                .split(',')
                .any(|u| u == user)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_default_profile_parses() {
        let p = Profile::parse(default_profile_text()).unwrap();
        assert_eq!(p.meta.name.as_deref(), Some("default"));
        assert_eq!(p.session, SessionConfig::default());
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let p = Profile::parse("[timing]\nhold_to_drag_ms = 700\n").unwrap();
        assert_eq!(p.session.timing.hold_to_drag_ms, 700);
        assert_eq!(p.session.timing.double_click_ms, 400);
        assert_eq!(p.session.thresholds, Thresholds::default());
    }

    #[test]
    fn rejects_release_tighter_than_engage() {
        let err = Profile::parse("[thresholds]\npinch = 0.3\npinch_release = 0.2\n").unwrap_err();
        assert!(err.to_string().contains("pinch_release"));
    }

    #[test]
    fn rejects_ok_hold_wider_than_press_release() {
        let err = Profile::parse("[thresholds]\nok_hold = 0.6\n").unwrap_err();
        assert!(err.to_string().contains("ok_hold"));
        assert!(Profile::parse("[thresholds]\nok_hold = 0.32\n").is_ok());
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        assert!(Profile::parse("[smoothing]\nalpha = 0.0\n").is_err());
        assert!(Profile::parse("[smoothing]\nalpha = 1.5\n").is_err());
        assert!(Profile::parse("[smoothing]\nalpha = 1.0\n").is_ok());
    }

    #[test]
    fn rejects_inverted_region() {
        assert!(Profile::parse("[screen]\nregion_x = [0.8, 0.2]\n").is_err());
    }

    #[test]
    fn screen_mapping_clamps_and_mirrors() {
        let sc = ScreenConfig {
            width: 1001,
            height: 501,
            region_x: [0.2, 0.8],
            region_y: [0.0, 1.0],
            mirror_x: false,
        };
        assert_eq!(sc.to_screen(0.5, 0.5), (500, 250));
        assert_eq!(sc.to_screen(0.0, -1.0), (0, 0));
        assert_eq!(sc.to_screen(1.0, 2.0), (1000, 500));

        let mirrored = ScreenConfig {
            mirror_x: true,
            ..sc
        };
        assert_eq!(mirrored.to_screen(0.2, 0.0), (1000, 0));
    }
}
