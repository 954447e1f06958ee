use crate::models::position::PositionSample;

/// Returns true when `sample` is significant enough to persist: it is the
/// first sample, enough time has passed, or it moved far enough.
pub fn accept(
    sample: &PositionSample,
    previous_accepted: Option<&PositionSample>,
    min_interval_ms: i64,
    min_distance_meters: f64,
) -> bool {
    let Some(previous) = previous_accepted else {
        return true;
    };
    if sample.timestamp - previous.timestamp >= min_interval_ms {
        return true;
    }
    sample.distance_to(previous) >= min_distance_meters
}

/// Time/distance throttle holding the last accepted sample.
#[derive(Debug)]
pub struct UpdateGate {
    min_interval_ms: i64,
    min_distance_meters: f64,
    last_accepted: Option<PositionSample>,
}

impl UpdateGate {
    pub fn new(min_interval_ms: i64, min_distance_meters: f64) -> Self {
        Self {
            min_interval_ms,
            min_distance_meters,
            last_accepted: None,
        }
    }

    pub fn offer(&mut self, sample: PositionSample) -> bool {
        let accepted = accept(
            &sample,
            self.last_accepted.as_ref(),
            self.min_interval_ms,
            self.min_distance_meters,
        );
        if accepted {
            self.last_accepted = Some(sample);
        }
        accepted
    }

    /// Records a sample captured without going through the throttle.
    pub fn force(&mut self, sample: PositionSample) {
        self.last_accepted = Some(sample);
    }

    pub fn last_accepted(&self) -> Option<&PositionSample> {
        self.last_accepted.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::position::SampleSource;
    use crate::processor::geo::offset_north;

    fn sample(lat: f64, lon: f64, t: i64) -> PositionSample {
        PositionSample::new(lat, lon, t, SampleSource::Realtime)
    }

    #[test]
    fn test_time_threshold_scenario() {
        let mut gate = UpdateGate::new(5_000, 10.0);
        assert!(gate.offer(sample(14.5995, 120.9842, 0)));
        assert!(!gate.offer(sample(14.5995, 120.9842, 2_000)));
        assert!(gate.offer(sample(14.5995, 120.9842, 6_000)));
        assert_eq!(gate.last_accepted().unwrap().timestamp, 6_000);
    }

    #[test]
    fn test_distance_threshold_accepts_early_sample() {
        let mut gate = UpdateGate::new(5_000, 10.0);
        assert!(gate.offer(sample(14.5995, 120.9842, 0)));
        assert!(!gate.offer(sample(offset_north(14.5995, 5.0), 120.9842, 1_000)));
        assert!(gate.offer(sample(offset_north(14.5995, 12.0), 120.9842, 1_500)));
    }

    #[test]
    fn test_rejected_sample_does_not_move_reference() {
        let mut gate = UpdateGate::new(5_000, 10.0);
        gate.offer(sample(0.0, 0.0, 0));
        // 8m then another 8m: each is under the threshold relative to the reference
        assert!(!gate.offer(sample(offset_north(0.0, 8.0), 0.0, 1_000)));
        assert!(gate.offer(sample(offset_north(0.0, 16.0), 0.0, 2_000)));
    }

    #[test]
    fn test_accept_matches_predicate() {
        let prev = sample(0.0, 0.0, 10_000);
        for (dt, meters) in [(0, 0.0), (4_999, 9.9), (5_000, 0.0), (100, 10.0), (-500, 3.0)] {
            let next = sample(offset_north(0.0, meters), 0.0, 10_000 + dt);
            let expected = dt >= 5_000 || next.distance_to(&prev) >= 10.0;
            assert_eq!(accept(&next, Some(&prev), 5_000, 10.0), expected);
        }
        assert!(accept(&prev, None, 5_000, 10.0));
    }
}
