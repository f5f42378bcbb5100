//! Per-frame geometric relations between landmarks.
//!
//! Everything here is stateless: one smoothed hand in, one snapshot out.
//! Distances are planar and divided by the wrist to middle-MCP length so the
//! thresholds hold whether the hand is near the camera or far from it.

use crate::config::Thresholds;
use crate::landmarks::{
    INDEX_DIP, INDEX_MCP, INDEX_PIP, INDEX_TIP, MIDDLE_MCP, MIDDLE_PIP, MIDDLE_TIP, PINKY_PIP,
    PINKY_TIP, RING_PIP, RING_TIP, THUMB_TIP, WRIST,
};
use crate::smoother::SmoothedHand;

const MIN_REFERENCE: f32 = 1e-4;

/// Mutually exclusive per-frame gesture labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GestureCandidate {
    #[default]
    None,
    Pinch,
    PinkyWristFlick,
    OkHold,
    IndexMiddleTogetherUp,
    IndexMiddleTogetherDown,
}

impl GestureCandidate {
    /// Click/drag family.
    pub fn is_press(&self) -> bool {
        matches!(self, Self::Pinch | Self::OkHold)
    }

    pub fn is_scroll(&self) -> bool {
        matches!(
            self,
            Self::IndexMiddleTogetherUp | Self::IndexMiddleTogetherDown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pinch => "pinch",
            Self::PinkyWristFlick => "pinky-wrist",
            Self::OkHold => "ok-hold",
            Self::IndexMiddleTogetherUp => "together-up",
            Self::IndexMiddleTogetherDown => "together-down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeometrySnapshot {
    /// Wrist to middle-MCP length in raw normalized units.
    pub reference: f32,
    /// Thumb tip to the nearest index joint.
    pub pinch_distance: f32,
    /// Thumb tip to index tip.
    pub ok_distance: f32,
    pub pinky_wrist_distance: f32,
    pub index_middle_distance: f32,
    pub ok_shape: bool,
    /// Negative when the joined fingertips sit above the middle knuckle.
    pub scroll_pose_bias: f32,
    /// Index fingertip, raw normalized image coordinates.
    pub pointer: (f32, f32),
    /// Vertical position of the index/middle tip mid-point.
    pub scroll_anchor_y: f32,
}

impl GeometrySnapshot {
    /// Priority: click/drag, then right click, then scroll.
    pub fn candidate(&self, th: &Thresholds) -> GestureCandidate {
        if self.ok_shape {
            return GestureCandidate::OkHold;
        }
        if self.pinch_distance < th.pinch {
            return GestureCandidate::Pinch;
        }
        if self.pinky_wrist_distance < th.pinky_wrist {
            return GestureCandidate::PinkyWristFlick;
        }
        if self.index_middle_distance < th.fingers_together {
            if self.scroll_pose_bias < -th.scroll_pose_deadzone {
                return GestureCandidate::IndexMiddleTogetherUp;
            }
            if self.scroll_pose_bias > th.scroll_pose_deadzone {
                return GestureCandidate::IndexMiddleTogetherDown;
            }
        }
        GestureCandidate::None
    }

    /// Press persists until the wider release distance is crossed.
    pub fn press_held(&self, th: &Thresholds) -> bool {
        self.pinch_distance < th.pinch_release
    }

    pub fn fingers_held_together(&self, th: &Thresholds) -> bool {
        self.index_middle_distance < th.fingers_release
    }
}

#[derive(Debug, Clone)]
pub struct GeometryClassifier {
    th: Thresholds,
}

impl GeometryClassifier {
    pub fn new(th: Thresholds) -> Self {
        Self { th }
    }

    pub fn classify(&self, hand: &SmoothedHand) -> (GeometrySnapshot, GestureCandidate) {
        let snap = snapshot(hand, &self.th);
        let candidate = snap.candidate(&self.th);
        (snap, candidate)
    }
}

pub fn snapshot(hand: &SmoothedHand, th: &Thresholds) -> GeometrySnapshot {
    let p = |i: usize| hand.point(i);
    let reference = p(WRIST).distance_xy(p(MIDDLE_MCP)).max(MIN_REFERENCE);
    let norm = |a: usize, b: usize| p(a).distance_xy(p(b)) / reference;

    let pinch_distance = [INDEX_MCP, INDEX_PIP, INDEX_DIP, INDEX_TIP]
        .iter()
        .map(|&j| norm(THUMB_TIP, j))
        .fold(f32::MAX, f32::min);
    let ok_distance = norm(THUMB_TIP, INDEX_TIP);

    let extended = |tip: usize, pip: usize| norm(tip, WRIST) > norm(pip, WRIST);
    let others_extended = extended(MIDDLE_TIP, MIDDLE_PIP)
        && extended(RING_TIP, RING_PIP)
        && extended(PINKY_TIP, PINKY_PIP);

    let scroll_anchor_y = (p(INDEX_TIP).y + p(MIDDLE_TIP).y) / 2.0;

    GeometrySnapshot {
        reference,
        pinch_distance,
        ok_distance,
        pinky_wrist_distance: norm(PINKY_TIP, WRIST),
        index_middle_distance: norm(INDEX_TIP, MIDDLE_TIP),
        ok_shape: ok_distance < th.ok_hold && others_extended,
        scroll_pose_bias: (scroll_anchor_y - p(MIDDLE_MCP).y) / reference,
        pointer: (p(INDEX_TIP).x, p(INDEX_TIP).y),
        scroll_anchor_y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Point3, fixtures};
    use crate::smoother::LandmarkSmoother;

    fn classify(points: Vec<Point3>) -> (GeometrySnapshot, GestureCandidate) {
        let hand = LandmarkSmoother::new(1.0).smooth(&points).unwrap();
        GeometryClassifier::new(Thresholds::default()).classify(&hand)
    }

    #[test]
    fn open_hand_has_no_gesture() {
        let (snap, cand) = classify(fixtures::open_hand());
        assert_eq!(cand, GestureCandidate::None);
        assert!((snap.reference - 0.2).abs() < 1e-5);
        assert!(!snap.ok_shape);
        assert!(snap.pinch_distance > 0.5);
    }

    #[test]
    fn thumb_on_index_side_is_pinch() {
        let (snap, cand) = classify(fixtures::pinch_hand());
        assert_eq!(cand, GestureCandidate::Pinch);
        assert!(snap.pinch_distance < 0.01);
        assert!(!snap.ok_shape);
    }

    #[test]
    fn thumb_on_index_tip_with_open_fingers_is_ok() {
        let (snap, cand) = classify(fixtures::ok_hand());
        assert_eq!(cand, GestureCandidate::OkHold);
        assert!(snap.ok_shape);
    }

    #[test]
    fn folded_pinky_is_right_click_geometry() {
        let (_, cand) = classify(fixtures::pinky_flick_hand());
        assert_eq!(cand, GestureCandidate::PinkyWristFlick);
    }

    #[test]
    fn joined_fingers_pointing_up() {
        let (snap, cand) = classify(fixtures::together_hand());
        assert_eq!(cand, GestureCandidate::IndexMiddleTogetherUp);
        assert!(snap.scroll_pose_bias < 0.0);
    }

    #[test]
    fn joined_fingers_pointing_down() {
        // flip the hand vertically around the middle knuckle
        let flipped = fixtures::together_hand()
            .into_iter()
            .map(|p| Point3::new(p.x, 1.2 - p.y, p.z))
            .collect();
        let (_, cand) = classify(flipped);
        assert_eq!(cand, GestureCandidate::IndexMiddleTogetherDown);
    }

    #[test]
    fn pinch_wins_over_right_click() {
        let mut both = fixtures::pinch_hand();
        both[PINKY_TIP] = fixtures::pinky_flick_hand()[PINKY_TIP];
        let (_, cand) = classify(both);
        assert_eq!(cand, GestureCandidate::Pinch);
    }

    #[test]
    fn thresholds_are_scale_invariant() {
        // same hand at half size, further from the camera
        let small = fixtures::pinch_hand()
            .into_iter()
            .map(|p| Point3::new(0.5 + (p.x - 0.5) * 0.5, 0.5 + (p.y - 0.5) * 0.5, p.z))
            .collect();
        let (snap, cand) = classify(small);
        assert_eq!(cand, GestureCandidate::Pinch);
        assert!((snap.reference - 0.1).abs() < 1e-5);
    }

    #[test]
    fn release_band_is_wider_than_engage() {
        let th = Thresholds::default();
        let snap = GeometrySnapshot {
            pinch_distance: (th.pinch + th.pinch_release) / 2.0,
            pinky_wrist_distance: 2.0,
            index_middle_distance: 2.0,
            ..Default::default()
        };
        assert_eq!(snap.candidate(&th), GestureCandidate::None);
        assert!(snap.press_held(&th));
    }
}
