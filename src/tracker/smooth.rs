use std::collections::BTreeMap;

use crate::frame_slot::Mode;
use crate::pose::keypoint::{BodyKeypoint, BodyPart, HandKeypoint, HandLandmark, HandPair, HandSide, Keypoint, Point3};
use crate::tracker::angles::{AngleMap, CoordMap};

/// `alpha * new + (1 - alpha) * prev`
pub fn ema(alpha: f32, new: f32, prev: f32) -> f32 {
    alpha * new + (1.0 - alpha) * prev
}

fn ema_opt(alpha: f32, new: Option<f32>, prev: Option<f32>) -> Option<f32> {
    match (new, prev) {
        (Some(n), Some(p)) => Some(ema(alpha, n, p)),
        (n, _) => n,
    }
}

/// Values that can be blended against their previous smoothed value.
trait Blend: Copy {
    fn blend(&self, prev: &Self, alpha: f32) -> Self;
}

impl Blend for f32 {
    fn blend(&self, prev: &Self, alpha: f32) -> Self {
        ema(alpha, *self, *prev)
    }
}

impl Blend for Point3 {
    fn blend(&self, prev: &Self, alpha: f32) -> Self {
        Point3::new(
            ema(alpha, self.x, prev.x),
            ema(alpha, self.y, prev.y),
            ema(alpha, self.z, prev.z),
        )
    }
}

// confidence / visible always come from the new sample
impl<N: Copy> Blend for Keypoint<N> {
    fn blend(&self, prev: &Self, alpha: f32) -> Self {
        Keypoint {
            x: ema(alpha, self.x, prev.x),
            y: ema(alpha, self.y, prev.y),
            normalized_x: ema_opt(alpha, self.normalized_x, prev.normalized_x),
            normalized_y: ema_opt(alpha, self.normalized_y, prev.normalized_y),
            z: ema_opt(alpha, self.z, prev.z),
            ..*self
        }
    }
}

fn smooth_points<N: Ord + Copy>(
    alpha: f32,
    current: &[Keypoint<N>],
    state: &mut BTreeMap<N, Keypoint<N>>,
) -> Vec<Keypoint<N>> {
    current
        .iter()
        .map(|kp| {
            let out = match state.get(&kp.name) {
                Some(prev) => kp.blend(prev, alpha),
                None => *kp,
            };
            state.insert(kp.name, out);
            out
        })
        .collect()
}

fn smooth_values<K: Ord + Copy, V: Blend>(
    alpha: f32,
    current: &BTreeMap<K, V>,
    state: &mut BTreeMap<K, V>,
) -> BTreeMap<K, V> {
    current
        .iter()
        .map(|(k, v)| {
            let out = match state.get(k) {
                Some(prev) => v.blend(prev, alpha),
                None => *v,
            };
            state.insert(*k, out);
            (*k, out)
        })
        .collect()
}

/// Previous smoothed values, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct SmoothingState {
    body: BTreeMap<BodyPart, BodyKeypoint>,
    hands: HandPair<BTreeMap<HandLandmark, HandKeypoint>>,
    angles: AngleMap,
    coords: CoordMap,
    last_mode: Option<Mode>,
}

/// One frame's worth of values to smooth
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseSample {
    pub body: Vec<BodyKeypoint>,
    pub hands: HandPair<Vec<HandKeypoint>>,
    pub angles: AngleMap,
    pub coords: CoordMap,
}

/// EMA による時間方向の平滑化
///
/// Each named point, joint and axis is smoothed independently. The first
/// value seen for a name passes through and seeds the state. A hand that
/// disappears for a frame loses its state, and the 3-D state is dropped
/// whenever the frame mode changes.
pub struct TemporalSmoother {
    alpha: f32,
    state: SmoothingState,
}

impl TemporalSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            state: SmoothingState::default(),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn apply(&mut self, mode: Mode, sample: PoseSample) -> PoseSample {
        if self.state.last_mode != Some(mode) {
            if self.state.last_mode.is_some() {
                log::debug!("frame mode changed to {:?}, clearing 3-D smoothing state", mode);
            }
            self.state.angles.clear();
            self.state.coords.clear();
            self.state.last_mode = Some(mode);
        }

        let body = smooth_points(self.alpha, &sample.body, &mut self.state.body);
        let hands = HandPair {
            left: self.smooth_hand(HandSide::Left, &sample.hands.left),
            right: self.smooth_hand(HandSide::Right, &sample.hands.right),
        };

        let (angles, coords) = match mode {
            Mode::ThreeD => (
                smooth_values(self.alpha, &sample.angles, &mut self.state.angles),
                smooth_values(self.alpha, &sample.coords, &mut self.state.coords),
            ),
            Mode::TwoD => (sample.angles, sample.coords),
        };

        PoseSample {
            body,
            hands,
            angles,
            coords,
        }
    }

    fn smooth_hand(&mut self, side: HandSide, points: &[HandKeypoint]) -> Vec<HandKeypoint> {
        let state = self.state.hands.get_mut(side);
        if points.is_empty() {
            state.clear();
            return Vec::new();
        }
        smooth_points(self.alpha, points, state)
    }

    pub fn reset(&mut self) {
        self.state = SmoothingState::default();
    }
}
