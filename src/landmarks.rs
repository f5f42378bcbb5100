//! Landmark frames as delivered by the perception stream.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Landmarks per detected hand.
pub const LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_PIP: usize = 6;
pub const INDEX_DIP: usize = 7;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_TIP: usize = 12;
pub const RING_PIP: usize = 14;
pub const RING_TIP: usize = 16;
pub const PINKY_PIP: usize = 18;
pub const PINKY_TIP: usize = 20;

/// A point in normalized image space (x right, y down, z relative depth).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Planar distance; perception depth is too noisy to use.
    pub fn distance_xy(&self, other: &Point3) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<[f32; 3]> for Point3 {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Point3> for [f32; 3] {
    fn from(p: Point3) -> Self {
        [p.x, p.y, p.z]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandObservation {
    #[serde(default)]
    pub handedness: Option<Handedness>,
    pub landmarks: Vec<Point3>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkFrame {
    pub index: u64,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub hands: Vec<HandObservation>,
}

impl LandmarkFrame {
    /// The hand the engine interprets. Only the first detection is used.
    pub fn primary_hand(&self) -> Result<&HandObservation, EngineError> {
        self.hands
            .first()
            .ok_or(EngineError::HandLost { frame: self.index })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Synthetic right hand, upright, palm to the camera. Wrist to middle MCP
    //! is 0.2 so normalized distances are easy to reason about.

    use super::*;

    const OPEN: [[f32; 2]; LANDMARK_COUNT] = [
        [0.50, 0.80], // wrist
        [0.42, 0.75],
        [0.38, 0.70],
        [0.35, 0.65],
        [0.32, 0.60], // thumb tip
        [0.45, 0.60], // index
        [0.44, 0.50],
        [0.435, 0.45],
        [0.43, 0.40],
        [0.50, 0.60], // middle
        [0.50, 0.48],
        [0.50, 0.43],
        [0.50, 0.37],
        [0.55, 0.61], // ring
        [0.56, 0.50],
        [0.565, 0.45],
        [0.57, 0.40],
        [0.60, 0.64], // pinky
        [0.62, 0.56],
        [0.63, 0.52],
        [0.64, 0.48],
    ];

    pub fn open_hand() -> Vec<Point3> {
        OPEN.iter().map(|p| Point3::new(p[0], p[1], 0.0)).collect()
    }

    /// Thumb tip resting on the index PIP joint.
    pub fn pinch_hand() -> Vec<Point3> {
        let mut h = open_hand();
        h[THUMB_TIP] = Point3::new(0.44, 0.50, 0.0);
        h
    }

    /// Thumb tip on the index tip with the other three fingers extended.
    pub fn ok_hand() -> Vec<Point3> {
        let mut h = open_hand();
        h[THUMB_TIP] = Point3::new(0.43, 0.41, 0.0);
        h
    }

    /// Pinky folded down to the heel of the palm.
    pub fn pinky_flick_hand() -> Vec<Point3> {
        let mut h = open_hand();
        h[PINKY_TIP] = Point3::new(0.55, 0.75, 0.0);
        h
    }

    /// Index and middle tips together, pointing up.
    pub fn together_hand() -> Vec<Point3> {
        let mut h = open_hand();
        h[MIDDLE_TIP] = Point3::new(0.45, 0.38, 0.0);
        h
    }

    pub fn shifted(points: Vec<Point3>, dx: f32, dy: f32) -> Vec<Point3> {
        points
            .into_iter()
            .map(|p| Point3::new(p.x + dx, p.y + dy, p.z))
            .collect()
    }

    pub fn frame(index: u64, timestamp_ms: u64, landmarks: Vec<Point3>) -> LandmarkFrame {
        LandmarkFrame {
            index,
            timestamp_ms,
            hands: vec![HandObservation {
                handedness: Some(Handedness::Right),
                landmarks,
            }],
        }
    }

    pub fn empty_frame(index: u64, timestamp_ms: u64) -> LandmarkFrame {
        LandmarkFrame {
            index,
            timestamp_ms,
            hands: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_frame() {
        let mut pts = String::new();
        for i in 0..LANDMARK_COUNT {
            if i > 0 {
                pts.push(',');
            }
            pts.push_str("[0.5,0.5,0.0]");
        }
        let line = format!(
            r#"{{"index":3,"timestamp_ms":100,"hands":[{{"handedness":"left","landmarks":[{pts}]}}]}}"#
        );
        let f: LandmarkFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(f.index, 3);
        let hand = f.primary_hand().unwrap();
        assert_eq!(hand.handedness, Some(Handedness::Left));
        assert_eq!(hand.landmarks.len(), LANDMARK_COUNT);
        assert_eq!(hand.landmarks[0], Point3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn missing_hands_is_hand_lost() {
        let f: LandmarkFrame = serde_json::from_str(r#"{"index":9,"timestamp_ms":5}"#).unwrap();
        assert!(matches!(
            f.primary_hand(),
            Err(EngineError::HandLost { frame: 9 })
        ));
    }

    #[test]
    fn planar_distance_ignores_depth() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(0.3, 0.4, 9.0);
        assert!((a.distance_xy(&b) - 0.5).abs() < 1e-6);
    }
}
