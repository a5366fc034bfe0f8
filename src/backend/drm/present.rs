use std::time::Duration;

use super::FlipEvent;

/// Vsync timing as derived from page-flip events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VsyncInfo {
    /// Duration of one vsync interval, if known
    pub vsync_duration: Option<Duration>,
    /// Vsyncs that passed without a flip between the last two flips
    pub skipped_vsyncs: Option<u32>,
    /// Monotonic time at which the last queued frame hit the screen
    pub last_queue_display_time: Option<Duration>,
}

/// Presentation feedback of the flips of one crtc
///
/// Every completed flip carries the vblank sequence number and timestamp it happened at.
/// The distance to the previous flip yields the vsync interval and the number of vsyncs
/// that were missed.
#[derive(Debug, Clone, Default)]
pub struct PresentSync {
    nominal: Option<Duration>,
    last_time: Duration,
    last_sequence: u32,
    info: VsyncInfo,
}

impl PresentSync {
    /// Creates the feedback for a mode refreshing at `refresh_rate` Hz
    pub fn new(refresh_rate: Option<f64>) -> PresentSync {
        let nominal = refresh_rate
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|rate| Duration::from_secs_f64(1.0 / rate));
        PresentSync {
            nominal,
            info: VsyncInfo {
                vsync_duration: nominal,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Feeds a completed flip
    pub fn record(&mut self, event: &FlipEvent) {
        // no usable statistics if the timestamp is missing or did not advance
        if event.time.is_zero() || event.time == self.last_time {
            self.info = VsyncInfo {
                vsync_duration: self.nominal,
                ..Default::default()
            };
            return;
        }

        let first = self.last_time.is_zero();
        let time_passed = event.time.saturating_sub(self.last_time);
        let msc_passed = event.sequence.wrapping_sub(self.last_sequence);
        self.last_time = event.time;
        self.last_sequence = event.sequence;

        self.info = if first || msc_passed == 0 {
            VsyncInfo {
                vsync_duration: self.nominal,
                skipped_vsyncs: None,
                last_queue_display_time: Some(event.time),
            }
        } else {
            VsyncInfo {
                vsync_duration: Some(time_passed / msc_passed),
                skipped_vsyncs: Some(msc_passed - 1),
                last_queue_display_time: Some(event.time),
            }
        };
    }

    /// The timing of the last flip
    pub fn info(&self) -> VsyncInfo {
        self.info
    }

    /// Forgets all previous flips
    pub fn reset(&mut self) {
        *self = PresentSync::new(self.nominal.map(|d| 1.0 / d.as_secs_f64()));
    }
}
