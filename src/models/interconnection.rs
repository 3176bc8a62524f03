use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::data::time_series::TimeSeries;

/// A capacity-limited link between two zones in the network arena.
///
/// Zones are referenced by their arena index; flows are signed, positive when
/// power moves from `zone_from` to `zone_to`, and the rating applies
/// symmetrically in both directions. The historical flow series is reference
/// data for validation, not an OPF input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interconnection {
    zone_from: usize,
    zone_to: usize,
    zone_from_name: String,
    zone_to_name: String,
    power_rating: f64,
    historical_flows: TimeSeries,
    simulated_flows: TimeSeries,
}

impl Interconnection {
    pub fn new(
        zone_from: usize,
        zone_to: usize,
        zone_from_name: String,
        zone_to_name: String,
        power_rating: f64,
        historical_flows: TimeSeries,
    ) -> Self {
        Self {
            zone_from,
            zone_to,
            zone_from_name,
            zone_to_name,
            power_rating,
            historical_flows,
            simulated_flows: TimeSeries::new(),
        }
    }

    pub fn zone_from(&self) -> usize {
        self.zone_from
    }

    pub fn zone_to(&self) -> usize {
        self.zone_to
    }

    pub fn zone_from_name(&self) -> &str {
        &self.zone_from_name
    }

    pub fn zone_to_name(&self) -> &str {
        &self.zone_to_name
    }

    pub fn power_rating(&self) -> f64 {
        self.power_rating
    }

    pub fn historical_flows(&self) -> &TimeSeries {
        &self.historical_flows
    }

    pub fn simulated_flows(&self) -> &TimeSeries {
        &self.simulated_flows
    }

    /// Signed contribution of a flow on this line to a zone's net export.
    pub fn export_from(&self, zone: usize, flow: f64) -> f64 {
        if zone == self.zone_from {
            flow
        } else if zone == self.zone_to {
            -flow
        } else {
            0.0
        }
    }

    pub fn record_flow(&mut self, timestep: NaiveDateTime, flow: f64) {
        self.simulated_flows.push(timestep, flow);
    }
}
