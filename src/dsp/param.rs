//! AudioParam — a value automated over absolute time.
//!
//! Mirrors the WebAudio automation model closely enough that envelopes and
//! sweeps scheduled against it behave the same in preview and export:
//! `set_value_at_time` steps, `linear_ramp_to_value_at_time` and
//! `exponential_ramp_to_value_at_time` interpolate from the previous event.

#[derive(Debug, Clone, Copy, PartialEq)]
enum Curve {
    Set,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct AutomationEvent {
    time: f64,
    value: f64,
    curve: Curve,
}

#[derive(Debug, Clone)]
pub struct AudioParam {
    default_value: f64,
    events: Vec<AutomationEvent>,
}

impl AudioParam {
    pub fn new(default_value: f64) -> Self {
        AudioParam {
            default_value,
            events: Vec::new(),
        }
    }

    fn insert(&mut self, event: AutomationEvent) {
        // Events at equal times keep insertion order.
        let idx = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(idx, event);
    }

    pub fn set_value_at_time(&mut self, value: f64, time: f64) -> &mut Self {
        self.insert(AutomationEvent {
            time,
            value,
            curve: Curve::Set,
        });
        self
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f64, time: f64) -> &mut Self {
        self.insert(AutomationEvent {
            time,
            value,
            curve: Curve::Linear,
        });
        self
    }

    pub fn exponential_ramp_to_value_at_time(&mut self, value: f64, time: f64) -> &mut Self {
        self.insert(AutomationEvent {
            time,
            value,
            curve: Curve::Exponential,
        });
        self
    }

    /// Drop every event at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) -> &mut Self {
        self.events.retain(|e| e.time < time);
        self
    }

    pub fn has_automation(&self) -> bool {
        !self.events.is_empty()
    }

    /// Time of the last scheduled event, if any.
    pub fn end_time(&self) -> Option<f64> {
        self.events.last().map(|e| e.time)
    }

    /// The parameter's value at absolute time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        // Index of the first event strictly after t.
        let next = self.events.partition_point(|e| e.time <= t);

        if next == self.events.len() {
            return self.events.last().map_or(self.default_value, |e| e.value);
        }

        let upcoming = self.events[next];
        let (prev_time, prev_value) = if next == 0 {
            // Ramps before any event start from the default at time 0.
            (0.0_f64.min(upcoming.time), self.default_value)
        } else {
            let p = self.events[next - 1];
            (p.time, p.value)
        };

        match upcoming.curve {
            Curve::Set => prev_value,
            Curve::Linear => {
                let span = upcoming.time - prev_time;
                if span <= 0.0 {
                    return upcoming.value;
                }
                let frac = ((t - prev_time) / span).clamp(0.0, 1.0);
                prev_value + (upcoming.value - prev_value) * frac
            }
            Curve::Exponential => {
                let span = upcoming.time - prev_time;
                // Zero or sign-crossing endpoints hold the previous value.
                if span <= 0.0 || prev_value == 0.0 || prev_value * upcoming.value <= 0.0 {
                    return prev_value;
                }
                let frac = ((t - prev_time) / span).clamp(0.0, 1.0);
                prev_value * (upcoming.value / prev_value).powf(frac)
            }
        }
    }
}
