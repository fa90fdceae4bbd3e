use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::{MissionError, MissionResult};

/// Distance progress at one poll tick, assuming constant nominal speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSample {
    pub elapsed_seconds: f64,
    pub distance_covered: f64,
    pub distance_total: f64,
}

impl ProgressSample {
    pub fn distance_remaining(&self) -> f64 {
        (self.distance_total - self.distance_covered).max(0.0)
    }

    pub fn is_complete(&self) -> bool {
        self.distance_covered >= self.distance_total
    }
}

impl fmt::Display for ProgressSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time elapsed: {}, Distance covered: {:.2} meters.",
            format_clock(self.elapsed_seconds),
            self.distance_covered
        )
    }
}

/// `min(speed * elapsed, total)`, clamped at zero for negative input.
pub fn sample(elapsed: f64, speed: f64, total_distance: f64) -> ProgressSample {
    let covered = (speed * elapsed).max(0.0).min(total_distance);
    ProgressSample {
        elapsed_seconds: elapsed,
        distance_covered: covered,
        distance_total: total_distance,
    }
}

/// Renders seconds as `M min S sec`, truncating fractions.
pub fn format_clock(seconds: f64) -> String {
    let whole = seconds.max(0.0) as u64;
    format!("{} min {} sec", whole / 60, whole % 60)
}

/// Traversal estimate as logged before a timed run.
pub fn format_eta(eta: Duration) -> String {
    format!("{}(s)", format_clock(eta.as_secs_f64()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressMonitor {
    speed: f64,
    total_distance: f64,
    eta: Duration,
}

impl ProgressMonitor {
    pub fn new(speed: f64, total_distance: f64) -> MissionResult<Self> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(MissionError::InvalidFieldSpec(format!(
                "nominal speed must be positive, got {}",
                speed
            )));
        }
        if !total_distance.is_finite() || total_distance < 0.0 {
            return Err(MissionError::InvalidFieldSpec(format!(
                "total distance must be non-negative, got {}",
                total_distance
            )));
        }
        let eta = Duration::try_from_secs_f64(total_distance / speed).map_err(|_| {
            MissionError::InvalidFieldSpec(format!(
                "{} m at {} m/s has no representable traversal time",
                total_distance, speed
            ))
        })?;
        Ok(Self {
            speed,
            total_distance,
            eta,
        })
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    /// `total_distance / speed`.
    pub fn time_to_traverse(&self) -> Duration {
        self.eta
    }

    pub fn sample(&self, elapsed: Duration) -> ProgressSample {
        sample(elapsed.as_secs_f64(), self.speed, self.total_distance)
    }

    pub fn is_complete(&self, elapsed: Duration) -> bool {
        elapsed >= self.time_to_traverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_line_reference_course() {
        let monitor = ProgressMonitor::new(0.17, 30.0).unwrap();
        let eta = monitor.time_to_traverse().as_secs_f64();
        assert!((eta - 176.47).abs() < 0.01);

        let halfway = monitor.sample(Duration::from_secs_f64(88.24));
        assert!((halfway.distance_covered - 15.0).abs() < 0.01);
        assert!((halfway.distance_remaining() - 15.0).abs() < 0.01);
        assert!(!halfway.is_complete());
    }

    #[test]
    fn test_sample_saturates_at_total() {
        let late = sample(1_000.0, 0.17, 30.0);
        assert_eq!(late.distance_covered, 30.0);
        assert!(late.is_complete());
        assert_eq!(late.distance_remaining(), 0.0);
    }

    #[test]
    fn test_is_complete_at_eta() {
        let monitor = ProgressMonitor::new(2.0, 10.0).unwrap();
        assert!(!monitor.is_complete(Duration::from_millis(4_999)));
        assert!(monitor.is_complete(Duration::from_secs(5)));
    }

    #[test]
    fn test_rejects_non_positive_speed() {
        assert!(ProgressMonitor::new(0.0, 10.0).is_err());
        assert!(ProgressMonitor::new(-1.0, 10.0).is_err());
        assert!(ProgressMonitor::new(1.0, f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_unrepresentable_eta() {
        assert!(matches!(
            ProgressMonitor::new(1e-20, 30.0),
            Err(MissionError::InvalidFieldSpec(_))
        ));
        assert!(ProgressMonitor::new(f64::MIN_POSITIVE, f64::MAX).is_err());
    }

    #[test]
    fn test_progress_line_format() {
        let line = sample(88.9, 0.17, 30.0).to_string();
        assert_eq!(line, "Time elapsed: 1 min 28 sec, Distance covered: 15.11 meters.");
        assert_eq!(
            format_eta(Duration::from_secs_f64(176.47)),
            "2 min 56 sec(s)"
        );
    }

    #[test]
    fn test_yard_course_eta() {
        // 30.1 yd at one yard every 12 s
        let monitor = ProgressMonitor::new(0.9144 / 12.0, 30.1 * 0.9144).unwrap();
        assert!((monitor.time_to_traverse().as_secs_f64() - 361.2).abs() < 1e-6);
    }
}
