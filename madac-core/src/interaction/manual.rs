//! Two-button gesture classifier
//!
//! The buttons are sampled periodically. A press episode starts when any
//! button goes down and ends when both are released; the set of buttons
//! seen during the episode decides which gesture it belongs to.

use crate::controller::Intent;
use crate::motion::MotionRequest;

/// Hold time for a long press
pub const LONG_PRESS_MS: u64 = 1_000;

/// Longest press that still counts as a tap
pub const TAP_MAX_MS: u64 = 300;

/// Maximum gap between the two taps of a double tap
pub const DOUBLE_TAP_GAP_MS: u64 = 400;

const UP: u8 = 0b01;
const DOWN: u8 = 0b10;
const BOTH: u8 = UP | DOWN;

/// Recognised button gestures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ManualPush {
    LongPressUp,
    LongPressDown,
    LongPressBoth,
    DoubleTapUp,
    DoubleTapDown,
    DoubleTapBoth,
}

impl ManualPush {
    /// Intent bound to the gesture
    pub fn intent(self) -> Intent {
        match self {
            ManualPush::LongPressUp => Intent::Move(MotionRequest::Percentage(100)),
            ManualPush::LongPressDown => Intent::Move(MotionRequest::Percentage(0)),
            ManualPush::LongPressBoth => Intent::Move(MotionRequest::Calibrate),
            ManualPush::DoubleTapUp | ManualPush::DoubleTapDown => Intent::Stop,
            ManualPush::DoubleTapBoth => Intent::Resync(0),
        }
    }

    fn long(mask: u8) -> Option<Self> {
        match mask {
            UP => Some(ManualPush::LongPressUp),
            DOWN => Some(ManualPush::LongPressDown),
            BOTH => Some(ManualPush::LongPressBoth),
            _ => None,
        }
    }

    fn double(mask: u8) -> Option<Self> {
        match mask {
            UP => Some(ManualPush::DoubleTapUp),
            DOWN => Some(ManualPush::DoubleTapDown),
            BOTH => Some(ManualPush::DoubleTapBoth),
            _ => None,
        }
    }
}

/// Press episode in progress
#[derive(Debug, Clone, Copy)]
struct Episode {
    started_ms: u64,
    mask: u8,
    long_reported: bool,
}

/// Completed tap waiting for its partner
#[derive(Debug, Clone, Copy)]
struct Tap {
    released_ms: u64,
    mask: u8,
}

/// Gesture classifier fed with periodic button samples
#[derive(Debug, Clone, Default)]
pub struct ButtonClassifier {
    episode: Option<Episode>,
    last_tap: Option<Tap>,
}

impl ButtonClassifier {
    /// Create an idle classifier
    pub const fn new() -> Self {
        Self {
            episode: None,
            last_tap: None,
        }
    }

    /// Feed one sample of the (debounced) button levels
    pub fn update(&mut self, now_ms: u64, up: bool, down: bool) -> Option<ManualPush> {
        let pressed = (up as u8) * UP | (down as u8) * DOWN;

        match (self.episode.as_mut(), pressed) {
            (None, 0) => None,
            (None, mask) => {
                self.episode = Some(Episode {
                    started_ms: now_ms,
                    mask,
                    long_reported: false,
                });
                None
            }
            (Some(episode), 0) => {
                let episode = *episode;
                self.episode = None;
                self.released(now_ms, episode)
            }
            (Some(episode), mask) => {
                episode.mask |= mask;
                let held_ms = now_ms.saturating_sub(episode.started_ms);
                if !episode.long_reported && held_ms >= LONG_PRESS_MS {
                    episode.long_reported = true;
                    self.last_tap = None;
                    return ManualPush::long(episode.mask);
                }
                None
            }
        }
    }

    fn released(&mut self, now_ms: u64, episode: Episode) -> Option<ManualPush> {
        if episode.long_reported || now_ms.saturating_sub(episode.started_ms) > TAP_MAX_MS {
            self.last_tap = None;
            return None;
        }

        let press_started = episode.started_ms;
        match self.last_tap.take() {
            Some(tap)
                if tap.mask == episode.mask
                    && press_started.saturating_sub(tap.released_ms) <= DOUBLE_TAP_GAP_MS =>
            {
                ManualPush::double(episode.mask)
            }
            _ => {
                self.last_tap = Some(Tap {
                    released_ms: now_ms,
                    mask: episode.mask,
                });
                None
            }
        }
    }
}
