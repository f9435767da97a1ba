//! Per-joint error scoring against a target pose.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::tracker::angles::{AngleMap, Joint};

/// 現在の関節角度から関節ごとの誤差 (度) を算出する
pub trait PoseComparator: Send {
    fn compare(&mut self, angles: &AngleMap) -> Vec<(Joint, f32)>;
}

/// Mock scoring used while no reference routine is loaded.
///
/// Every joint present in the input gets a uniform error in `[0, max_error)`.
pub struct RandomComparator {
    rng: StdRng,
    max_error: f32,
}

impl RandomComparator {
    pub fn new(max_error: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            max_error: max_error.max(0.0),
        }
    }
}

impl PoseComparator for RandomComparator {
    fn compare(&mut self, angles: &AngleMap) -> Vec<(Joint, f32)> {
        if self.max_error <= 0.0 {
            return angles.keys().map(|&joint| (joint, 0.0)).collect();
        }
        angles
            .keys()
            .map(|&joint| (joint, self.rng.gen_range(0.0..self.max_error)))
            .collect()
    }
}

/// Absolute angular difference against a fixed reference pose.
pub struct ReferenceComparator {
    reference: AngleMap,
}

impl ReferenceComparator {
    pub fn new(reference: AngleMap) -> Self {
        Self { reference }
    }

    /// `{"left_elbow": 160.0, ...}`
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let reference: BTreeMap<Joint, f32> = serde_json::from_str(&content)?;
        Ok(Self::new(reference))
    }

    pub fn reference(&self) -> &AngleMap {
        &self.reference
    }
}

impl PoseComparator for ReferenceComparator {
    fn compare(&mut self, angles: &AngleMap) -> Vec<(Joint, f32)> {
        angles
            .iter()
            .filter_map(|(joint, &angle)| {
                let target = self.reference.get(joint)?;
                Some((*joint, (angle - target).abs()))
            })
            .collect()
    }
}
