use crate::data::time_series::TimeSeries;
use crate::models::sector::{Role, Sector};

/// An energy storage system modelled as two sectors sharing one name: a load
/// half (charging) and a generator half (discharging).
///
/// The signed historical power series is split by sign: negative samples
/// become the load half's consumption magnitude, positive samples the
/// generator half's production. Both halves keep the full time axis so a
/// charging hour shows up as zero availability on the discharging side and
/// vice versa.
#[derive(Debug, Clone)]
pub struct Storage {
    load: Sector,
    generator: Sector,
}

impl Storage {
    pub fn new(name: &str, controllable: bool, historical_power: &TimeSeries) -> Self {
        let charging = historical_power.map_values(|v| (-v).max(0.0));
        let discharging = historical_power.map_values(|v| v.max(0.0));
        Self {
            load: Sector::new_storage_half(name.to_string(), Role::Load, controllable, charging),
            generator: Sector::new_storage_half(
                name.to_string(),
                Role::Generator,
                controllable,
                discharging,
            ),
        }
    }

    pub fn into_halves(self) -> (Sector, Sector) {
        (self.load, self.generator)
    }
}
