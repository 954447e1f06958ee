use crate::models::geofence::GeofenceConfig;
use crate::models::position::PositionSample;
use crate::processor::geo;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceVerdict {
    pub inside: bool,
    pub transitioned: bool,
    pub distance_meters: f64,
}

/// Boundary inclusive.
pub fn is_inside(distance_meters: f64, radius_meters: f64) -> bool {
    distance_meters <= radius_meters
}

pub fn evaluate(
    sample: &PositionSample,
    center: (f64, f64),
    radius_meters: f64,
    previous_inside: bool,
) -> GeofenceVerdict {
    let distance_meters =
        geo::haversine_meters(center.0, center.1, sample.latitude, sample.longitude);
    let inside = is_inside(distance_meters, radius_meters);
    GeofenceVerdict {
        inside,
        transitioned: inside != previous_inside,
        distance_meters,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceObservation {
    pub verdict: GeofenceVerdict,
    /// Set on the first outside sample after being inside.
    pub alert: bool,
}

/// Session-scoped geofence state with alert debouncing.
#[derive(Debug, Default)]
pub struct GeofenceMonitor {
    config: Option<GeofenceConfig>,
    previous_inside: bool,
    alerted: bool,
}

impl GeofenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&mut self, config: GeofenceConfig) {
        self.config = Some(config);
        self.previous_inside = true;
        self.alerted = false;
    }

    pub fn set_radius(&mut self, radius_meters: f64) -> bool {
        match self.config.as_mut() {
            Some(config) => {
                config.radius_meters = radius_meters;
                true
            }
            None => false,
        }
    }

    pub fn disable(&mut self) {
        self.config = None;
        self.alerted = false;
    }

    pub fn config(&self) -> Option<&GeofenceConfig> {
        self.config.as_ref().filter(|c| c.enabled)
    }

    /// Returns `None` while no enabled geofence is configured.
    pub fn observe(&mut self, sample: &PositionSample) -> Option<GeofenceObservation> {
        let config = *self.config()?;
        let verdict = evaluate(
            sample,
            (config.center_latitude, config.center_longitude),
            config.radius_meters,
            self.previous_inside,
        );
        self.previous_inside = verdict.inside;

        let alert = if verdict.inside {
            self.alerted = false;
            false
        } else if !self.alerted {
            self.alerted = true;
            true
        } else {
            false
        };

        Some(GeofenceObservation { verdict, alert })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::position::SampleSource;
    use crate::processor::geo::offset_north;

    const CENTER: (f64, f64) = (14.5995, 120.9842);

    fn at_distance(meters: f64) -> PositionSample {
        PositionSample::new(
            offset_north(CENTER.0, meters),
            CENTER.1,
            0,
            SampleSource::Realtime,
        )
    }

    #[test]
    fn test_boundary_is_inside() {
        assert!(is_inside(100.0, 100.0));
        assert!(!is_inside(100.000_001, 100.0));
    }

    #[test]
    fn test_scenario_99_and_101_meters() {
        let near = evaluate(&at_distance(99.0), CENTER, 100.0, true);
        assert!(near.inside);
        assert!(!near.transitioned);

        let far = evaluate(&at_distance(101.0), CENTER, 100.0, near.inside);
        assert!(!far.inside);
        assert!(far.transitioned);

        let still_far = evaluate(&at_distance(150.0), CENTER, 100.0, far.inside);
        assert!(!still_far.inside);
        assert!(!still_far.transitioned);
    }

    #[test]
    fn test_alert_fires_once_per_exit() {
        let mut monitor = GeofenceMonitor::new();
        monitor.configure(GeofenceConfig::new(CENTER.0, CENTER.1, 100.0));

        let alerts: Vec<bool> = [50.0, 101.0, 120.0, 300.0, 80.0, 130.0, 140.0]
            .iter()
            .map(|d| monitor.observe(&at_distance(*d)).unwrap().alert)
            .collect();
        assert_eq!(alerts, vec![false, true, false, false, false, true, false]);
    }

    #[test]
    fn test_disabled_monitor_observes_nothing() {
        let mut monitor = GeofenceMonitor::new();
        assert!(monitor.observe(&at_distance(500.0)).is_none());
        assert!(!monitor.set_radius(10.0));

        monitor.configure(GeofenceConfig::new(CENTER.0, CENTER.1, 100.0));
        assert!(monitor.set_radius(600.0));
        assert!(monitor.observe(&at_distance(500.0)).unwrap().verdict.inside);

        monitor.disable();
        assert!(monitor.observe(&at_distance(500.0)).is_none());
    }
}
