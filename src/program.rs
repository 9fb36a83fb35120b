//! Timed workout programs.
//!
//! A program is a timeline of equal-length segments plus a sparse list of
//! breakpoints: a breakpoint at segment `n` sets the level for segment `n` and
//! every following segment until the next breakpoint.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Level change at the start of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// One-based segment number
    pub segment: u32,
    /// Resistance level from this segment on
    pub level: u32,
}

impl Breakpoint {
    /// Create a breakpoint
    #[must_use]
    pub const fn new(segment: u32, level: u32) -> Self {
        Self { segment, level }
    }
}

/// Level of the last breakpoint at or before `segment`
#[must_use]
pub fn level_for_segment(breakpoints: &[Breakpoint], segment: u32) -> Option<u32> {
    breakpoints
        .iter()
        .rev()
        .find(|bp| bp.segment <= segment)
        .map(|bp| bp.level)
}

/// Where a program stands at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// One-based active segment, clamped to the segment count
    pub segment: u32,
    /// Level the active segment calls for; `None` before the first breakpoint
    pub level: Option<u32>,
    /// Elapsed time has reached the program duration
    pub completed: bool,
    /// Percent of the duration elapsed, 0-100
    pub percent: f64,
    /// Seconds left, never negative
    pub remaining_secs: f64,
    /// Seconds since the program started
    pub elapsed_secs: f64,
}

/// Evaluate a program timeline at `now`
///
/// `breakpoints` must be sorted by segment.
#[must_use]
pub fn evaluate(
    start: Instant,
    now: Instant,
    duration_minutes: u32,
    segment_duration_secs: f64,
    total_segments: u32,
    breakpoints: &[Breakpoint],
) -> Evaluation {
    let elapsed = now.saturating_duration_since(start).as_secs_f64();
    let total = f64::from(duration_minutes) * 60.0;

    let segment = if segment_duration_secs > 0.0 {
        // bounded by total_segments right after, so the cast cannot truncate
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = (elapsed / segment_duration_secs).floor() as u64;
        u32::try_from(index.saturating_add(1))
            .unwrap_or(u32::MAX)
            .min(total_segments)
    } else {
        total_segments
    };

    let (percent, remaining_secs) = if total > 0.0 {
        ((elapsed / total * 100.0).min(100.0), (total - elapsed).max(0.0))
    } else {
        (100.0, 0.0)
    };

    Evaluation {
        segment,
        level: level_for_segment(breakpoints, segment),
        completed: elapsed >= total,
        percent,
        remaining_secs,
        elapsed_secs: elapsed,
    }
}

/// Progress summary for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramProgress {
    /// Percent complete, 0-100
    pub percent: f64,
    /// Seconds left
    pub remaining_secs: f64,
    /// Active segment (0 before start)
    pub segment: u32,
}

/// Details of the active segment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// One-based active segment
    pub segment: u32,
    /// Level for this segment, if any breakpoint applies yet
    pub level: Option<u32>,
    /// Level of the next breakpoint after this segment
    pub next_level: Option<u32>,
    /// Seconds until the next segment starts
    pub remaining_in_segment_secs: f64,
}

/// A workout program bound to a run
#[derive(Debug, Clone)]
pub struct SportProgram {
    name: String,
    breakpoints: Vec<Breakpoint>,
    total_segments: u32,
    duration_minutes: u32,
    segment_duration_secs: f64,
    start_time: Option<Instant>,
    current_segment: u32,
    completed: bool,
}

impl SportProgram {
    /// Build a program; breakpoints are sorted by segment
    ///
    /// The duration starts at zero and has to be set before the program is
    /// useful.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        mut breakpoints: Vec<Breakpoint>,
        total_segments: u32,
    ) -> Self {
        breakpoints.sort_by_key(|bp| bp.segment);
        Self {
            name: name.into(),
            breakpoints,
            total_segments,
            duration_minutes: 0,
            segment_duration_secs: 0.0,
            start_time: None,
            current_segment: 0,
            completed: false,
        }
    }

    /// Builder form of [`Self::set_duration`]
    #[must_use]
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.set_duration(minutes);
        self
    }

    /// Set the total duration and derive the segment length
    pub fn set_duration(&mut self, minutes: u32) {
        self.duration_minutes = minutes;
        self.segment_duration_secs = if self.total_segments == 0 {
            0.0
        } else {
            f64::from(minutes) * 60.0 / f64::from(self.total_segments)
        };
        debug!(
            "Program {}: {} min, {:.1}s per segment",
            self.name, minutes, self.segment_duration_secs
        );
    }

    /// Start (or restart) the program now
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    /// Start (or restart) the program at `start`
    pub fn start_at(&mut self, start: Instant) {
        self.start_time = Some(start);
        self.current_segment = 0;
        self.completed = false;
        info!("Started program: {} ({} min)", self.name, self.duration_minutes);
    }

    fn evaluate_at(&self, now: Instant) -> Option<Evaluation> {
        let start = self.start_time?;
        Some(evaluate(
            start,
            now,
            self.duration_minutes,
            self.segment_duration_secs,
            self.total_segments,
            &self.breakpoints,
        ))
    }

    /// Level the program calls for right now
    pub fn current_level(&mut self) -> Option<u32> {
        self.current_level_at(Instant::now())
    }

    /// Level the program calls for at `now`
    ///
    /// `None` before start, once completed, or before the first breakpoint.
    pub fn current_level_at(&mut self, now: Instant) -> Option<u32> {
        if self.completed {
            return None;
        }
        let eval = self.evaluate_at(now)?;

        if eval.completed {
            self.completed = true;
            info!("Program {} completed", self.name);
            return None;
        }

        if eval.segment != self.current_segment {
            debug!("Program {} entering segment {}", self.name, eval.segment);
            self.current_segment = eval.segment;
        }
        eval.level
    }

    /// Progress at `now`
    #[must_use]
    pub fn progress_at(&self, now: Instant) -> ProgramProgress {
        self.evaluate_at(now).map_or(
            ProgramProgress {
                percent: 0.0,
                remaining_secs: f64::from(self.duration_minutes) * 60.0,
                segment: 0,
            },
            |eval| ProgramProgress {
                percent: eval.percent,
                remaining_secs: eval.remaining_secs,
                segment: eval.segment,
            },
        )
    }

    /// Active segment details at `now`; `None` before start or after the end
    #[must_use]
    pub fn segment_info_at(&self, now: Instant) -> Option<SegmentInfo> {
        let eval = self.evaluate_at(now)?;
        if eval.completed {
            return None;
        }

        let next_level = self
            .breakpoints
            .iter()
            .find(|bp| bp.segment > eval.segment)
            .map(|bp| bp.level);
        let segment_end = f64::from(eval.segment) * self.segment_duration_secs;

        Some(SegmentInfo {
            segment: eval.segment,
            level: eval.level,
            next_level,
            remaining_in_segment_secs: (segment_end - eval.elapsed_secs).max(0.0),
        })
    }

    /// Program name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breakpoints, sorted by segment
    #[must_use]
    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Number of segments
    #[must_use]
    pub const fn total_segments(&self) -> u32 {
        self.total_segments
    }

    /// Duration in minutes
    #[must_use]
    pub const fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    /// Length of one segment in seconds
    #[must_use]
    pub const fn segment_duration_secs(&self) -> f64 {
        self.segment_duration_secs
    }

    /// Segment seen by the last level query
    #[must_use]
    pub const fn current_segment(&self) -> u32 {
        self.current_segment
    }

    /// Whether the program has been started
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    /// Whether the program ran to its end
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }
}

/// Rate-limits program level changes sent to the bike
#[derive(Debug, Clone)]
pub struct LevelGovernor {
    interval: Duration,
    last_check: Option<Instant>,
}

impl LevelGovernor {
    /// Check at most once per `interval`
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_check: None,
        }
    }

    /// Level to send, if a check is due and `desired` differs from the bike
    pub fn poll(&mut self, now: Instant, desired: Option<u32>, bike_level: u32) -> Option<u32> {
        if let Some(last) = self.last_check {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_check = Some(now);

        desired.filter(|&level| level != bike_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hill() -> SportProgram {
        SportProgram::new(
            "Hill",
            vec![
                Breakpoint::new(6, 15),
                Breakpoint::new(1, 5),
                Breakpoint::new(3, 10),
            ],
            6,
        )
        .with_duration(60)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_segment_and_level() {
        let mut program = hill();
        let start = Instant::now();
        program.start_at(start);

        assert!((program.segment_duration_secs() - 600.0).abs() < f64::EPSILON);
        assert_eq!(program.breakpoints()[0], Breakpoint::new(1, 5));

        assert_eq!(program.current_level_at(start), Some(5));
        assert_eq!(program.current_level_at(start + secs(1250)), Some(10));
        assert_eq!(program.current_segment(), 3);
        assert_eq!(program.current_level_at(start + secs(3599)), Some(15));
    }

    #[test]
    fn test_completion() {
        let mut program = hill();
        let start = Instant::now();
        program.start_at(start);

        let end = start + secs(3600);
        assert_eq!(program.current_level_at(end), None);
        assert!(program.is_completed());

        let progress = program.progress_at(end + secs(30));
        assert!((progress.percent - 100.0).abs() < f64::EPSILON);
        assert!(progress.remaining_secs.abs() < f64::EPSILON);
        assert_eq!(progress.segment, 6);
        assert!(program.segment_info_at(end).is_none());

        program.start_at(end);
        assert!(!program.is_completed());
        assert_eq!(program.current_level_at(end), Some(5));
    }

    #[test]
    fn test_not_started() {
        let mut program = hill();
        let now = Instant::now();

        assert!(!program.is_started());
        assert_eq!(program.current_level_at(now), None);
        assert!(program.segment_info_at(now).is_none());

        let progress = program.progress_at(now);
        assert_eq!(progress.segment, 0);
        assert!((progress.remaining_secs - 3600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_level_before_first_breakpoint() {
        let mut program =
            SportProgram::new("Late", vec![Breakpoint::new(2, 8)], 4).with_duration(4);
        let start = Instant::now();
        program.start_at(start);

        assert_eq!(program.current_level_at(start + secs(30)), None);
        assert_eq!(program.current_level_at(start + secs(61)), Some(8));
    }

    #[test]
    fn test_segment_info() {
        let mut program = hill();
        let start = Instant::now();
        program.start_at(start);

        let info = program.segment_info_at(start + secs(1250)).unwrap();
        assert_eq!(info.segment, 3);
        assert_eq!(info.level, Some(10));
        assert_eq!(info.next_level, Some(15));
        assert!((info.remaining_in_segment_secs - 550.0).abs() < 1e-6);

        let info = program.segment_info_at(start + secs(3000)).unwrap();
        assert_eq!(info.segment, 6);
        assert_eq!(info.next_level, None);
    }

    #[test]
    fn test_zero_segments_guarded() {
        let program = SportProgram::new("Empty", Vec::new(), 0).with_duration(10);
        assert!(program.segment_duration_secs().abs() < f64::EPSILON);

        let start = Instant::now();
        let eval = evaluate(start, start + secs(5), 10, 0.0, 0, &[]);
        assert_eq!(eval.segment, 0);
        assert_eq!(eval.level, None);
        assert!(!eval.completed);
    }

    #[test]
    fn test_progress_midway() {
        let start = Instant::now();
        let bps = [Breakpoint::new(1, 5)];
        let eval = evaluate(start, start + secs(900), 60, 600.0, 6, &bps);

        assert!((eval.percent - 25.0).abs() < 1e-9);
        assert!((eval.remaining_secs - 2700.0).abs() < 1e-9);
        assert_eq!(eval.segment, 2);
    }

    #[test]
    fn test_governor() {
        let mut governor = LevelGovernor::new(Duration::from_secs(1));
        let t0 = Instant::now();

        assert_eq!(governor.poll(t0, Some(10), 5), Some(10));
        assert_eq!(governor.poll(t0 + Duration::from_millis(500), Some(12), 5), None);
        assert_eq!(governor.poll(t0 + secs(1), Some(10), 10), None);
        assert_eq!(governor.poll(t0 + secs(2), None, 10), None);
        assert_eq!(governor.poll(t0 + secs(3), Some(11), 10), Some(11));
    }
}
