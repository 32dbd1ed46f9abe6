use log::{info, warn};

use crate::model::{Measurement, MeasurementKind, ThresholdLimits};
use crate::traits::AlertOutput;

/// First measurement kind whose reading lies outside its stored range.
pub fn first_breach(limits: &ThresholdLimits, measurement: &Measurement) -> Option<MeasurementKind> {
    MeasurementKind::ALL
        .into_iter()
        .find(|kind| !limits.range(*kind).contains(measurement.value(*kind)))
}

/// Drives `output` from the readings and latches it for the coming sleep; no
/// stored limits means no alert.
pub fn evaluate<A: AlertOutput>(
    limits: Option<&ThresholdLimits>,
    measurement: &Measurement,
    output: &mut A,
) -> bool {
    let breach = limits.and_then(|limits| first_breach(limits, measurement));
    match breach {
        Some(kind) => warn!(
            "Alert: {} reading {} outside {:?}",
            kind.key(),
            measurement.value(kind),
            limits.map(|limits| limits.range(kind))
        ),
        None => info!("Alert: all readings within limits"),
    }
    output.set_alert(breach.is_some());
    output.hold();
    breach.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Range;
    use crate::uplink::tests::sample_measurement;

    #[derive(Default)]
    struct Led {
        level: Option<bool>,
        held: Option<bool>,
    }

    impl AlertOutput for Led {
        fn set_alert(&mut self, active: bool) {
            self.level = Some(active);
            self.held = None;
        }

        fn hold(&mut self) {
            self.held = self.level;
        }
    }

    #[test]
    fn reading_inside_every_range_clears_alert() {
        let mut led = Led {
            level: Some(true),
            held: None,
        };
        assert!(!evaluate(Some(&ThresholdLimits::UNBOUNDED), &sample_measurement(), &mut led));
        assert_eq!(led.level, Some(false));
    }

    #[test]
    fn reading_above_max_raises_alert() {
        let limits = ThresholdLimits {
            temperature: Range::new(-5.0, 20.0),
            ..ThresholdLimits::UNBOUNDED
        };
        let mut led = Led::default();
        assert!(evaluate(Some(&limits), &sample_measurement(), &mut led));
        assert_eq!(led.level, Some(true));
        assert_eq!(
            first_breach(&limits, &sample_measurement()),
            Some(MeasurementKind::Temperature)
        );
    }

    #[test]
    fn reading_below_min_raises_alert() {
        let limits = ThresholdLimits {
            visible: Range::new(100.0, 400.0),
            ..ThresholdLimits::UNBOUNDED
        };
        assert_eq!(
            first_breach(&limits, &sample_measurement()),
            Some(MeasurementKind::Visible)
        );
    }

    #[test]
    fn missing_limits_never_alert() {
        let mut led = Led::default();
        assert!(!evaluate(None, &sample_measurement(), &mut led));
        assert_eq!(led.level, Some(false));
    }

    #[test]
    fn alert_level_is_held_after_it_is_set() {
        let limits = ThresholdLimits {
            moisture: Range::new(50.0, 90.0),
            ..ThresholdLimits::UNBOUNDED
        };
        let mut led = Led::default();
        assert!(evaluate(Some(&limits), &sample_measurement(), &mut led));
        assert_eq!(led.held, Some(true));

        assert!(!evaluate(None, &sample_measurement(), &mut led));
        assert_eq!(led.held, Some(false));
    }
}
