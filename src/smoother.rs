//! Exponential smoothing of raw landmark positions.

use crate::error::EngineError;
use crate::landmarks::{LANDMARK_COUNT, Point3};

/// Filtered landmarks for one frame, indexed like the raw input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedHand(pub [Point3; LANDMARK_COUNT]);

impl SmoothedHand {
    pub fn point(&self, idx: usize) -> &Point3 {
        &self.0[idx]
    }
}

#[derive(Debug, Clone)]
pub struct LandmarkSmoother {
    alpha: f32,
    prev: Option<[Point3; LANDMARK_COUNT]>,
}

impl LandmarkSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            prev: None,
        }
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }

    pub fn smooth(&mut self, raw: &[Point3]) -> Result<SmoothedHand, EngineError> {
        if raw.len() != LANDMARK_COUNT {
            return Err(EngineError::InvalidLandmarkCount { got: raw.len() });
        }

        let mut out = [Point3::default(); LANDMARK_COUNT];
        match &self.prev {
            None => out.copy_from_slice(raw),
            Some(prev) => {
                let a = self.alpha;
                for (i, (r, p)) in raw.iter().zip(prev.iter()).enumerate() {
                    out[i] = Point3::new(
                        a * r.x + (1.0 - a) * p.x,
                        a * r.y + (1.0 - a) * p.y,
                        a * r.z + (1.0 - a) * p.z,
                    );
                }
            }
        }
        self.prev = Some(out);
        Ok(SmoothedHand(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::fixtures;

    #[test]
    fn first_frame_passes_through() {
        let mut s = LandmarkSmoother::new(0.5);
        let raw = fixtures::open_hand();
        let out = s.smooth(&raw).unwrap();
        assert_eq!(out.0.as_slice(), raw.as_slice());
    }

    #[test]
    fn blends_towards_new_sample() {
        let mut s = LandmarkSmoother::new(0.5);
        s.smooth(&fixtures::open_hand()).unwrap();
        let out = s.smooth(&fixtures::shifted(fixtures::open_hand(), 0.1, 0.0)).unwrap();
        let wrist = out.point(0);
        assert!((wrist.x - 0.55).abs() < 1e-6);
        assert!((wrist.y - 0.80).abs() < 1e-6);
    }

    #[test]
    fn alpha_one_disables_smoothing() {
        let mut s = LandmarkSmoother::new(1.0);
        s.smooth(&fixtures::open_hand()).unwrap();
        let moved = fixtures::shifted(fixtures::open_hand(), 0.2, -0.1);
        let out = s.smooth(&moved).unwrap();
        assert_eq!(out.0.as_slice(), moved.as_slice());
    }

    #[test]
    fn wrong_count_is_rejected_without_touching_state() {
        let mut s = LandmarkSmoother::new(0.5);
        s.smooth(&fixtures::open_hand()).unwrap();

        let mut short = fixtures::open_hand();
        short.truncate(20);
        assert!(matches!(
            s.smooth(&short),
            Err(EngineError::InvalidLandmarkCount { got: 20 })
        ));

        // retained state is still the first frame
        let out = s.smooth(&fixtures::open_hand()).unwrap();
        assert_eq!(out.0.as_slice(), fixtures::open_hand().as_slice());
    }

    #[test]
    fn reset_restarts_pass_through() {
        let mut s = LandmarkSmoother::new(0.3);
        s.smooth(&fixtures::open_hand()).unwrap();
        s.reset();
        let moved = fixtures::shifted(fixtures::open_hand(), 0.1, 0.1);
        let out = s.smooth(&moved).unwrap();
        assert_eq!(out.0.as_slice(), moved.as_slice());
    }
}
