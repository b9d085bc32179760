//! Frame pacing and PTS bookkeeping
//!
//! All internal timing is in microseconds. PTS values are assigned from
//! running counters in stream time-base units and never rewritten;
//! drift is corrected one audio frame at a time by padding or
//! discarding.

use std::time::Instant;

use ffmpeg_next::{Rational, Rescale};

pub(crate) const USEC_TB: Rational = Rational(1, 1_000_000);

/// Monotonic microsecond clock for the lifetime of a pipeline
pub(crate) struct UsecClock {
    origin: Instant,
}

impl UsecClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

pub(crate) fn rescale_to_usec(value: i64, src: Rational) -> i64 {
    value.rescale(src, USEC_TB)
}

pub(crate) fn rescale_from_usec(value: i64, dst: Rational) -> i64 {
    value.rescale(USEC_TB, dst)
}

/// Video timing state
pub(crate) struct VideoClock {
    /// Observed duration of the last frame, µs; starts at 1e6/framerate
    pub real_frame_duration: i64,
    /// Poll period of the muxing thread: half the nominal duration
    pub frame_duration: i64,
    /// Arrival time of the previous frame, µs; 0 before the first frame
    pub time_last_frame: i64,
    /// Next PTS in stream time-base units
    pub next_pts: i64,
}

impl VideoClock {
    pub fn new(framerate: i32) -> Self {
        let real = rescale_to_usec(1, Rational(1, framerate));
        Self {
            real_frame_duration: real,
            frame_duration: real / 2,
            time_last_frame: 0,
            next_pts: 0,
        }
    }

    /// Track the observed frame duration: an inter-frame gap of at least
    /// a quarter of the nominal duration updates the real duration used
    /// for PTS advancement.
    pub fn update_sample_stats(&mut self, now: i64) {
        if self.time_last_frame > 0 {
            let last_dur = now - self.time_last_frame;
            if last_dur >= self.real_frame_duration / 4 {
                self.real_frame_duration = last_dur;
            }
        }
        self.time_last_frame = now;
    }

    /// How far past due the next frame is; positive means overdue
    pub fn delay(&self, now: i64) -> i64 {
        if self.time_last_frame == 0 {
            return self.real_frame_duration;
        }
        now - (self.time_last_frame + self.real_frame_duration)
    }
}

/// Audio timing state
pub(crate) struct AudioClock {
    /// Duration of one codec frame, µs
    pub frame_duration: i64,
    /// Duration of one codec frame in stream time-base units
    pub pkt_duration: i64,
    /// Emission time of the previous frame, µs; 0 before the first frame
    pub time_last_frame: i64,
    /// Next PTS in stream time-base units
    pub next_pts: i64,
}

impl AudioClock {
    pub fn new(frame_duration: i64, pkt_duration: i64) -> Self {
        Self {
            frame_duration,
            pkt_duration,
            time_last_frame: 0,
            next_pts: 0,
        }
    }

    /// Wall-clock delay for the audio-only case
    pub fn delay(&self, now: i64) -> i64 {
        if self.time_last_frame == 0 {
            return self.frame_duration;
        }
        now - (self.time_last_frame + self.frame_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_clock_initial() {
        let c = VideoClock::new(30);
        assert_eq!(c.real_frame_duration, 33_333);
        assert_eq!(c.frame_duration, 16_666);
        // first frame is always due
        assert_eq!(c.delay(0), 33_333);
    }

    #[test]
    fn test_video_clock_updates_on_slow_frames() {
        let mut c = VideoClock::new(30);
        c.update_sample_stats(1_000_000);
        c.update_sample_stats(1_050_000);
        assert_eq!(c.real_frame_duration, 50_000);
    }

    #[test]
    fn test_video_clock_ignores_jitter_bursts() {
        let mut c = VideoClock::new(30);
        c.update_sample_stats(1_000_000);
        // a burst frame 1 ms later is below the quarter-duration floor
        c.update_sample_stats(1_001_000);
        assert_eq!(c.real_frame_duration, 33_333);
        assert_eq!(c.time_last_frame, 1_001_000);
    }

    #[test]
    fn test_audio_delay() {
        let c = AudioClock::new(23_219, 1024);
        assert_eq!(c.delay(5), 23_219);
        let mut c = c;
        c.time_last_frame = 100_000;
        assert_eq!(c.delay(100_000 + 23_219), 0);
        assert_eq!(c.delay(150_000), 150_000 - 123_219);
    }

    #[test]
    fn test_usec_rescale_round_trip() {
        let tb = Rational(1, 44_100);
        let usec = rescale_to_usec(1024, tb);
        assert_eq!(usec, 23_219);
        let back = rescale_from_usec(usec, tb);
        assert!((back - 1024).abs() <= 1);
    }
}
