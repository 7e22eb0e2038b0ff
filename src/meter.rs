//! The meter state machine: turns successive raw readings into well-formed
//! measurement events and forwards them to an [`EventSink`].

use chrono::Utc;

use crate::entity::Variable;
use crate::error::Result;
use crate::event::{DurMeasurement, Event, InstMeasurement};
use crate::service::EventSink;
use crate::units::{Quantity, Unit};

/// Current wall-clock time as Unix seconds, at millisecond precision.
fn now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// A meter that posts readings on one variable.
///
/// Keeps an internal register so interval and register readings can be
/// translated into instantaneous or durational events, and tracks the time
/// of the preceding reading to support automatic power-to-energy conversion.
/// Not safe for concurrent posting; give each worker its own meter.
pub struct Meter<'a, S: EventSink> {
    sink: &'a S,
    variable: Variable,
    uncertainty: Quantity,
    time_uncertainty: f64,
    durational: bool,
    register: Quantity,
    last_read_time: Option<f64>,
}

impl<'a, S: EventSink> Meter<'a, S> {
    /// Creates a meter posting on `variable` through `sink`.
    ///
    /// `uncertainty` is the default uncertainty for measurement values (in
    /// energy units); `time_uncertainty` the default uncertainty for
    /// measurement times, in seconds. Seed `last_read_time` to resume a
    /// meter with a known prior reading.
    pub fn new(
        sink: &'a S,
        variable: Variable,
        uncertainty: Quantity,
        time_uncertainty: f64,
        durational: bool,
        last_read_time: Option<f64>,
    ) -> Self {
        Self {
            sink,
            variable,
            uncertainty,
            time_uncertainty,
            durational,
            register: Quantity::new(0.0, Unit::KilowattHour),
            last_read_time,
        }
    }

    /// Current register value, in energy units.
    pub fn register(&self) -> Quantity {
        self.register
    }

    /// Time of the last successful reading, if any.
    pub fn last_read_time(&self) -> Option<f64> {
        self.last_read_time
    }

    /// Puts the meter back into the "no prior reading" state, e.g. after a
    /// meter replacement. The register itself is left untouched.
    pub fn reset(&mut self) {
        self.last_read_time = None;
    }

    /// Converts and posts an absolute register reading.
    ///
    /// `quantity` must be convertible to energy units. `read_time` defaults
    /// to the current time, `uncertainty` to the meter's configured default.
    /// On any error the register and read time are left unchanged.
    pub async fn post_register_reading(
        &mut self,
        quantity: Quantity,
        uncertainty: Option<Quantity>,
        read_time: Option<f64>,
    ) -> Result<()> {
        let read_time = read_time.unwrap_or_else(now);
        let uncertainty = uncertainty.unwrap_or(self.uncertainty);

        let new_register = quantity.convert_to(Unit::KilowattHour)?;

        let mut events = Vec::new();
        if self.durational {
            // The first reading only establishes the baseline; thereafter
            // each reading closes an interval against the previous one. The
            // delta compounds the uncertainty of both endpoints.
            if let Some(last) = self.last_read_time {
                let delta = new_register.sub(self.register)?;
                events.push(self.durational_event(last, read_time, delta, uncertainty.scale(2.0)));
            }
        } else {
            let initial = self.last_read_time.is_none();
            events.push(self.instantaneous_event(read_time, new_register, uncertainty, initial));
        }

        self.post_all(&events).await?;
        self.register = new_register;
        self.last_read_time = Some(read_time);
        Ok(())
    }

    /// Converts and posts an interval reading: an energy delta, or an
    /// average power (detected by unit, multiplied by the interval length).
    ///
    /// `start_time` defaults to the previous read time, `end_time` to the
    /// current time. On any error the register and read time are left
    /// unchanged.
    pub async fn post_interval_reading(
        &mut self,
        quantity: Quantity,
        uncertainty: Option<Quantity>,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> Result<()> {
        let start_time = start_time.or(self.last_read_time);
        let end_time = end_time.unwrap_or_else(now);
        let uncertainty = uncertainty.unwrap_or(self.uncertainty);

        // Without a start time the delta has no anchor, so the register
        // cannot advance.
        let (quantity, new_register) = match start_time {
            None => (quantity, self.register),
            Some(start) => {
                let quantity = if quantity.is_convertible_to(Unit::Watt) {
                    quantity.mul_quantity(Quantity::new(end_time - start, Unit::Second))?
                } else {
                    quantity
                };
                let new_register = self.register.add(quantity)?;
                (quantity, new_register)
            }
        };

        let mut events = Vec::new();
        if self.durational {
            // Each interval reading yields one durational event; the
            // interval is self-contained, so even the first reading posts.
            events.push(self.durational_event(
                start_time.unwrap_or(end_time),
                end_time,
                quantity,
                uncertainty,
            ));
        } else {
            match self.last_read_time {
                None => match start_time {
                    // With no start time there is no way to date the old
                    // register value.
                    None => events.push(self.instantaneous_event(
                        end_time,
                        self.register,
                        uncertainty,
                        true,
                    )),
                    Some(start) => {
                        events.push(self.instantaneous_event(
                            start,
                            self.register,
                            uncertainty,
                            true,
                        ));
                        events.push(self.instantaneous_event(
                            end_time,
                            new_register,
                            uncertainty,
                            false,
                        ));
                    }
                },
                Some(last) => {
                    // A start that coincides with the previous end is already
                    // covered by that reading's end event.
                    let start = start_time.unwrap_or(last);
                    if start != last {
                        events.push(self.instantaneous_event(
                            start,
                            self.register,
                            uncertainty,
                            true,
                        ));
                    }
                    events.push(self.instantaneous_event(
                        end_time,
                        new_register,
                        uncertainty,
                        false,
                    ));
                }
            }
        }

        self.post_all(&events).await?;
        self.register = new_register;
        self.last_read_time = Some(end_time);
        Ok(())
    }

    fn durational_event(
        &self,
        start_time: f64,
        end_time: f64,
        quantity: Quantity,
        uncertainty: Quantity,
    ) -> Event {
        Event::Durational(DurMeasurement::new(
            &self.variable,
            start_time,
            end_time,
            quantity,
            self.time_uncertainty,
            self.time_uncertainty,
            uncertainty,
        ))
    }

    fn instantaneous_event(
        &self,
        occur_time: f64,
        quantity: Quantity,
        uncertainty: Quantity,
        initial: bool,
    ) -> Event {
        Event::Instantaneous(InstMeasurement::new(
            &self.variable,
            occur_time,
            quantity,
            self.time_uncertainty,
            uncertainty,
            initial,
        ))
    }

    async fn post_all(&self, events: &[Event]) -> Result<()> {
        for event in events {
            self.sink.post_event(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::Error;

    const T: f64 = 1234567890.0;

    /// Records every posted event instead of delivering it.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn post_event(&self, event: &Event) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Fails every post after the first `succeed` calls.
    struct FlakySink {
        succeed: Mutex<usize>,
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn post_event(&self, _event: &Event) -> Result<()> {
            let mut left = self.succeed.lock().unwrap();
            if *left == 0 {
                return Err(Error::HttpStatus { status: 500 });
            }
            *left -= 1;
            Ok(())
        }
    }

    fn variable(durational: bool) -> Variable {
        Variable::new(
            "1234",
            "example.com",
            "electricity.1",
            "House meter",
            "Usage",
            "garage",
            "electricity_consumption",
            Unit::KilowattHour,
            true,
            durational,
        )
    }

    fn kwh(value: f64) -> Quantity {
        Quantity::new(value, Unit::KilowattHour)
    }

    fn meter<'a, S: EventSink>(sink: &'a S, durational: bool) -> Meter<'a, S> {
        Meter::new(sink, variable(durational), kwh(0.001), 1.0, durational, None)
    }

    fn inst(event: &Event) -> &InstMeasurement {
        match event {
            Event::Instantaneous(e) => e,
            _ => panic!("expected an instantaneous event, got {event}"),
        }
    }

    fn dur(event: &Event) -> &DurMeasurement {
        match event {
            Event::Durational(e) => e,
            _ => panic!("expected a durational event, got {event}"),
        }
    }

    #[tokio::test]
    async fn test_first_register_reading_instantaneous() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_register_reading(kwh(5.0), None, Some(T))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = inst(&events[0]);
        assert!(event.initial);
        assert_eq!(event.quantity, kwh(5.0));
        assert_eq!(event.occur_time, T);
        assert_eq!(meter.register(), kwh(5.0));
        assert_eq!(meter.last_read_time(), Some(T));
    }

    #[tokio::test]
    async fn test_second_register_reading_instantaneous() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_register_reading(kwh(5.0), None, Some(T))
            .await
            .unwrap();
        sink.take();
        meter
            .post_register_reading(kwh(8.0), None, Some(T + 60.0))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = inst(&events[0]);
        assert!(!event.initial);
        assert_eq!(event.quantity, kwh(8.0));
        assert_eq!(event.occur_time, T + 60.0);
    }

    #[tokio::test]
    async fn test_first_durational_register_reading_is_baseline_only() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, true);

        meter
            .post_register_reading(kwh(5.0), None, Some(T))
            .await
            .unwrap();

        assert!(sink.events().is_empty());
        assert_eq!(meter.register(), kwh(5.0));
        assert_eq!(meter.last_read_time(), Some(T));
    }

    #[tokio::test]
    async fn test_second_durational_register_reading_posts_delta() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, true);

        meter
            .post_register_reading(kwh(5.0), None, Some(T))
            .await
            .unwrap();
        meter
            .post_register_reading(kwh(8.0), None, Some(T + 900.0))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = dur(&events[0]);
        assert_eq!(event.start_time, T);
        assert_eq!(event.end_time, T + 900.0);
        assert_eq!(event.quantity, kwh(3.0));
        // Endpoint errors compound.
        assert_eq!(event.quantity_uncertainty, kwh(0.002));
    }

    #[tokio::test]
    async fn test_register_reading_converts_to_energy_units() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_register_reading(Quantity::new(18_000_000.0, Unit::Joule), None, Some(T))
            .await
            .unwrap();

        assert_eq!(meter.register(), kwh(5.0));
    }

    #[tokio::test]
    async fn test_register_reading_rejects_non_energy_units() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        let err = meter
            .post_register_reading(Quantity::new(5.0, Unit::Watt), None, Some(T))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnitMismatch { .. }));
        assert!(sink.events().is_empty());
        assert_eq!(meter.register(), kwh(0.0));
        assert_eq!(meter.last_read_time(), None);
    }

    #[tokio::test]
    async fn test_first_interval_reading_posts_two_events() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_interval_reading(kwh(2.0), None, Some(T), Some(T + 900.0))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        let first = inst(&events[0]);
        assert!(first.initial);
        assert_eq!(first.occur_time, T);
        assert_eq!(first.quantity, kwh(0.0));
        let second = inst(&events[1]);
        assert!(!second.initial);
        assert_eq!(second.occur_time, T + 900.0);
        assert_eq!(second.quantity, kwh(2.0));
        assert_eq!(meter.last_read_time(), Some(T + 900.0));
    }

    #[tokio::test]
    async fn test_contiguous_interval_reading_skips_boundary_event() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_interval_reading(kwh(2.0), None, Some(T), Some(T + 900.0))
            .await
            .unwrap();
        sink.take();
        // Start coincides exactly with the previous end.
        meter
            .post_interval_reading(kwh(1.0), None, Some(T + 900.0), Some(T + 1800.0))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = inst(&events[0]);
        assert!(!event.initial);
        assert_eq!(event.occur_time, T + 1800.0);
        assert_eq!(event.quantity, kwh(3.0));
    }

    #[tokio::test]
    async fn test_gapped_interval_reading_posts_boundary_event() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_interval_reading(kwh(2.0), None, Some(T), Some(T + 900.0))
            .await
            .unwrap();
        sink.take();
        // A gap between readings needs a fresh boundary point.
        meter
            .post_interval_reading(kwh(1.0), None, Some(T + 1000.0), Some(T + 1900.0))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        let boundary = inst(&events[0]);
        assert!(boundary.initial);
        assert_eq!(boundary.occur_time, T + 1000.0);
        assert_eq!(boundary.quantity, kwh(2.0));
        let end = inst(&events[1]);
        assert!(!end.initial);
        assert_eq!(end.occur_time, T + 1900.0);
        assert_eq!(end.quantity, kwh(3.0));
    }

    #[tokio::test]
    async fn test_first_interval_reading_without_start_time() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_interval_reading(kwh(2.0), None, None, Some(T))
            .await
            .unwrap();

        // No way to date the old register, so a single initial event at the
        // end with the unchanged register.
        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = inst(&events[0]);
        assert!(event.initial);
        assert_eq!(event.occur_time, T);
        assert_eq!(event.quantity, kwh(0.0));
        assert_eq!(meter.register(), kwh(0.0));
        assert_eq!(meter.last_read_time(), Some(T));
    }

    #[tokio::test]
    async fn test_durational_interval_reading_posts_immediately() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, true);

        // Even the very first interval reading yields an event.
        meter
            .post_interval_reading(kwh(2.0), None, Some(T), Some(T + 900.0))
            .await
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = dur(&events[0]);
        assert_eq!(event.start_time, T);
        assert_eq!(event.end_time, T + 900.0);
        assert_eq!(event.quantity, kwh(2.0));
        assert_eq!(event.quantity_uncertainty, kwh(0.001));
        assert_eq!(meter.register(), kwh(2.0));
    }

    #[tokio::test]
    async fn test_power_reading_is_converted_by_elapsed_time() {
        let sink = RecordingSink::default();
        let mut meter_power = meter(&sink, true);
        meter_power
            .post_interval_reading(
                Quantity::new(2.0, Unit::Kilowatt),
                None,
                Some(T),
                Some(T + 3600.0),
            )
            .await
            .unwrap();
        // 2 kW over one hour is 2 kW h on the register.
        assert_eq!(
            meter_power.register().convert_to(Unit::KilowattHour).unwrap(),
            kwh(2.0)
        );

        let sink2 = RecordingSink::default();
        let mut meter_energy = meter(&sink2, true);
        meter_energy
            .post_interval_reading(kwh(2.0), None, Some(T), Some(T + 60.0))
            .await
            .unwrap();
        assert_eq!(
            meter_energy.register().convert_to(Unit::KilowattHour).unwrap(),
            kwh(2.0)
        );
    }

    #[tokio::test]
    async fn test_reset_restores_initial_behavior() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_register_reading(kwh(5.0), None, Some(T))
            .await
            .unwrap();
        meter
            .post_register_reading(kwh(8.0), None, Some(T + 60.0))
            .await
            .unwrap();
        sink.take();

        meter.reset();
        assert_eq!(meter.last_read_time(), None);
        // The register survives the reset.
        assert_eq!(meter.register(), kwh(8.0));

        meter
            .post_register_reading(kwh(9.0), None, Some(T + 120.0))
            .await
            .unwrap();
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(inst(&events[0]).initial);
    }

    #[tokio::test]
    async fn test_failed_post_leaves_state_unchanged() {
        let sink = FlakySink {
            succeed: Mutex::new(0),
        };
        let mut meter = meter(&sink, false);

        let err = meter
            .post_register_reading(kwh(5.0), None, Some(T))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 500 }));
        assert_eq!(meter.register(), kwh(0.0));
        assert_eq!(meter.last_read_time(), None);
    }

    #[tokio::test]
    async fn test_partial_post_failure_leaves_state_unchanged() {
        let sink = FlakySink {
            succeed: Mutex::new(1),
        };
        let mut meter = meter(&sink, false);

        // Two events are due; the second post fails.
        let err = meter
            .post_interval_reading(kwh(2.0), None, Some(T), Some(T + 900.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 500 }));
        assert_eq!(meter.register(), kwh(0.0));
        assert_eq!(meter.last_read_time(), None);
    }

    #[tokio::test]
    async fn test_interval_start_defaults_to_last_read_time() {
        let sink = RecordingSink::default();
        let mut meter = meter(&sink, false);

        meter
            .post_register_reading(kwh(5.0), None, Some(T))
            .await
            .unwrap();
        sink.take();
        meter
            .post_interval_reading(kwh(1.0), None, None, Some(T + 900.0))
            .await
            .unwrap();

        // The defaulted start equals the previous read time, so only the end
        // event is posted.
        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = inst(&events[0]);
        assert_eq!(event.occur_time, T + 900.0);
        assert_eq!(event.quantity, kwh(6.0));
    }
}
