use std::time::Duration;

use crate::config::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target over a list of stages.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    /// `start` is the target at t=0 unless the first stage restates its own start.
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    pub fn max_target(&self) -> u64 {
        self.stages
            .iter()
            .flat_map(|s| [s.start.unwrap_or(0), s.target])
            .fold(self.start, u64::max)
    }

    /// Index of the stage running at `elapsed`. Zero-length stages are never running;
    /// their jump is already folded into the next stage's start target.
    fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let idx = self.cumulative_ends.partition_point(|end| *end <= elapsed);
        (idx < self.stages.len()).then_some(idx)
    }

    fn stage_bounds(&self, idx: usize) -> (Duration, Duration) {
        let end = self.cumulative_ends[idx];
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (start, end)
    }

    fn start_target_of(&self, idx: usize) -> u64 {
        if let Some(start) = self.stages[idx].start {
            return start;
        }
        if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(idx) = self.stage_index_at(elapsed) else {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        };

        let (stage_start, stage_end) = self.stage_bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        let start_target = self.start_target_of(idx);
        let end_target = self.stages[idx].target;
        if stage_duration.is_zero() {
            return end_target;
        }

        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;

        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        // Integer division truncates toward zero, so ramps up and down both round toward
        // the start target.
        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let idx = self
            .stage_index_at(elapsed)
            .unwrap_or(self.stages.len() - 1);
        let clamped = elapsed.min(self.total_duration());

        let (stage_start, stage_end) = self.stage_bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target: self.start_target_of(idx),
            end_target: self.stages[idx].target,
            current_target: self.target_at(clamped),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(secs: u64, target: u64) -> Stage {
        Stage::new(Duration::from_secs(secs), target)
    }

    fn at(s: &RampingSchedule, secs: f64) -> u64 {
        s.target_at(Duration::from_secs_f64(secs))
    }

    #[test]
    fn ramp_plateau_ramp_down() {
        let s = RampingSchedule::new(0, vec![stage(10, 5), stage(30, 5), stage(10, 0)]);
        assert_eq!(s.total_duration(), Duration::from_secs(50));
        assert_eq!(s.max_target(), 5);

        assert_eq!(at(&s, 0.0), 0);
        assert_eq!(at(&s, 1.0), 0);
        assert_eq!(at(&s, 2.0), 1);
        assert_eq!(at(&s, 5.0), 2);
        assert_eq!(at(&s, 10.0), 5);
        assert_eq!(at(&s, 25.0), 5);
        assert_eq!(at(&s, 40.0), 5);
        assert_eq!(at(&s, 45.0), 3);
        assert_eq!(at(&s, 49.9), 1);
        assert_eq!(at(&s, 50.0), 0);
        assert_eq!(at(&s, 60.0), 0);
        assert!(!s.is_done(Duration::from_secs(49)));
        assert!(s.is_done(Duration::from_secs(50)));
    }

    #[test]
    fn zero_duration_stage_jumps() {
        let s = RampingSchedule::new(0, vec![stage(0, 8), stage(10, 8), stage(0, 2), stage(5, 2)]);
        assert_eq!(at(&s, 0.0), 8);
        assert_eq!(at(&s, 9.9), 8);
        assert_eq!(at(&s, 10.0), 2);
        assert_eq!(at(&s, 14.0), 2);
    }

    #[test]
    fn restated_start_overrides_previous_target() {
        let mut second = stage(10, 10);
        second.start = Some(6);
        let s = RampingSchedule::new(0, vec![stage(10, 2), second]);
        assert_eq!(at(&s, 9.0), 1);
        assert_eq!(at(&s, 10.0), 6);
        assert_eq!(at(&s, 15.0), 8);
        assert_eq!(s.max_target(), 10);
    }

    #[test]
    fn snapshot_reports_current_stage() {
        let s = RampingSchedule::new(0, vec![stage(10, 5), stage(30, 5), stage(10, 0)]);

        let snap = s
            .stage_snapshot_at(Duration::from_secs(12))
            .unwrap_or_else(|| panic!("snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, Duration::from_secs(2));
        assert_eq!(snap.stage_remaining, Duration::from_secs(28));
        assert_eq!((snap.start_target, snap.end_target), (5, 5));

        let last = s
            .stage_snapshot_at(Duration::from_secs(99))
            .unwrap_or_else(|| panic!("snapshot"));
        assert_eq!(last.index, 2);
        assert_eq!(last.stage_remaining, Duration::ZERO);
        assert_eq!(last.current_target, 0);

        assert!(RampingSchedule::new(0, Vec::new()).stage_snapshot_at(Duration::ZERO).is_none());
    }
}
