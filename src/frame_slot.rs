//! Latest-wins hand-off between the network producer and the inference
//! consumer. Holds at most one pending frame; a new `put` replaces whatever
//! has not been taken yet.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// 2-D keypoints only, or 2-D plus the 3-D angle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "2D")]
    TwoD,
    #[serde(rename = "3D")]
    ThreeD,
}

impl Mode {
    pub fn from_flag(use_3d: bool) -> Self {
        if use_3d {
            Mode::ThreeD
        } else {
            Mode::TwoD
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::TwoD => "2D",
            Mode::ThreeD => "3D",
        }
    }
}

/// Frame submitted by a client, waiting for the inference loop.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    /// Encoded image (JPEG/PNG/WebP)
    pub data: Vec<u8>,
    /// Client timestamp (ms)
    pub timestamp: f64,
    pub sequence: u64,
    pub use_3d: bool,
    pub received_at: Instant,
}

impl PendingFrame {
    pub fn new(data: Vec<u8>, timestamp: f64, sequence: u64, use_3d: bool) -> Self {
        Self {
            data,
            timestamp,
            sequence,
            use_3d,
            received_at: Instant::now(),
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::from_flag(self.use_3d)
    }
}

struct SlotState<T> {
    frame: Option<T>,
    dropped: u64,
}

/// 最新フレームのみを保持する単一スロット
pub struct FrameSlot<T = PendingFrame> {
    state: Mutex<SlotState<T>>,
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                frame: None,
                dropped: 0,
            }),
        }
    }

    // Every critical section leaves the state consistent, so a panic in
    // another holder never invalidates it.
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `frame`. Returns `true` if an undelivered frame was discarded.
    pub fn put(&self, frame: T) -> bool {
        let mut state = self.lock();
        let replaced = state.frame.replace(frame).is_some();
        if replaced {
            state.dropped += 1;
        }
        replaced
    }

    /// Remove the pending frame, or `None` when the slot is empty.
    pub fn take(&self) -> Option<T> {
        self.lock().frame.take()
    }

    /// Read and reset the dropped-frame counter.
    pub fn drain_dropped_count(&self) -> u64 {
        std::mem::take(&mut self.lock().dropped)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frame.is_none()
    }
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_take_empty_returns_none() {
        let slot: FrameSlot<u32> = FrameSlot::new();
        assert!(slot.take().is_none());
        assert!(slot.is_empty());
        assert_eq!(slot.drain_dropped_count(), 0);
    }

    #[test]
    fn test_latest_wins() {
        let slot = FrameSlot::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        assert_eq!(slot.take(), Some(2));
        assert_eq!(slot.take(), None);
        assert_eq!(slot.drain_dropped_count(), 1);
    }

    #[test]
    fn test_drain_resets_counter() {
        let slot = FrameSlot::new();
        for i in 0..5 {
            slot.put(i);
        }
        assert_eq!(slot.drain_dropped_count(), 4);
        assert_eq!(slot.drain_dropped_count(), 0);
        assert_eq!(slot.take(), Some(4));
    }

    #[test]
    fn test_put_after_take_is_not_a_drop() {
        let slot = FrameSlot::new();
        slot.put(1);
        assert_eq!(slot.take(), Some(1));
        assert!(!slot.put(2));
        assert_eq!(slot.drain_dropped_count(), 0);
    }

    #[test]
    fn test_pending_frame_roundtrip() {
        let slot = FrameSlot::new();
        slot.put(PendingFrame::new(vec![1, 2, 3], 10.0, 7, true));
        let frame = slot.take().unwrap();
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.mode(), Mode::ThreeD);
        assert_eq!(frame.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_mode_serializes_as_label() {
        assert_eq!(serde_json::to_string(&Mode::TwoD).unwrap(), "\"2D\"");
        assert_eq!(serde_json::to_string(&Mode::ThreeD).unwrap(), "\"3D\"");
        assert_eq!(Mode::from_flag(false).as_str(), "2D");
    }

    #[test]
    fn test_take_never_blocks_while_producers_run() {
        let slot = Arc::new(FrameSlot::new());
        let mut producers = Vec::new();
        for p in 0..4u64 {
            let slot = Arc::clone(&slot);
            producers.push(thread::spawn(move || {
                for i in 0..1000u64 {
                    slot.put(p * 1000 + i);
                }
            }));
        }

        let mut taken = 0u64;
        let start = Instant::now();
        while producers.iter().any(|h| !h.is_finished()) {
            let t0 = Instant::now();
            if slot.take().is_some() {
                taken += 1;
            }
            assert!(t0.elapsed() < Duration::from_secs(1), "take() blocked");
        }
        for h in producers {
            h.join().unwrap();
        }
        if slot.take().is_some() {
            taken += 1;
        }
        assert!(start.elapsed() < Duration::from_secs(30));

        // every put either got taken or was counted as dropped
        let dropped = slot.drain_dropped_count();
        assert_eq!(taken + dropped, 4000);
    }
}
