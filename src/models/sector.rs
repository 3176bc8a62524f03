use std::fmt;
use std::str::FromStr;

use anyhow::{ensure, Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::data::time_series::TimeSeries;

/// Whether a sector injects power into its zone or draws power from it.
/// The role flips the sign conventions and the reading of the price model
/// throughout the cost-function and dispatch logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Generator,
    Load,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generator" => Ok(Role::Generator),
            "load" => Ok(Role::Load),
            _ => Err(format!("Unknown sector role: {}", s)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Generator => write!(f, "generator"),
            Role::Load => write!(f, "load"),
        }
    }
}

/// A sector's linear price-responsiveness ramp.
///
/// `price_no_power` is the price at which the sector delivers no power: a
/// generator produces nothing at or below it, a load has nothing left to shed
/// at or above it (its consumption is zero there). `price_full_power` is the
/// price at which the full available power is committed. For production
/// `price_no_power <= price_full_power`; for consumption the order reverses.
/// Equal prices form a degenerate step model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorPriceModel {
    pub price_no_power: f64,
    pub price_full_power: f64,
}

impl SectorPriceModel {
    pub fn new(price_no_power: f64, price_full_power: f64) -> Self {
        Self {
            price_no_power,
            price_full_power,
        }
    }

    pub fn validate(&self, role: Role) -> Result<()> {
        match role {
            Role::Generator => ensure!(
                self.price_no_power <= self.price_full_power,
                "generator model requires price_no_power <= price_full_power, got ({}, {})",
                self.price_no_power,
                self.price_full_power
            ),
            Role::Load => ensure!(
                self.price_no_power >= self.price_full_power,
                "load model requires price_no_power >= price_full_power, got ({}, {})",
                self.price_no_power,
                self.price_full_power
            ),
        }
        Ok(())
    }

    pub fn is_step(&self) -> bool {
        self.price_no_power == self.price_full_power
    }

    /// The two threshold prices in increasing order. For a generator the ramp
    /// starts producing at the low end; for a load it starts shedding there.
    pub fn ramp_bounds(&self, role: Role) -> (f64, f64) {
        match role {
            Role::Generator => (self.price_no_power, self.price_full_power),
            Role::Load => (self.price_full_power, self.price_no_power),
        }
    }

    /// Minimum and maximum power the sector commits above its floor at
    /// `price`, given `available` MW. Both bounds coincide except at a
    /// degenerate step price, where the sector may sit anywhere in
    /// `[0, available]`.
    pub fn offer_bounds(&self, role: Role, price: f64, available: f64) -> (f64, f64) {
        let (low, high) = self.ramp_bounds(role);
        if low == high {
            if price < low {
                (0.0, 0.0)
            } else if price > low {
                (available, available)
            } else {
                (0.0, available)
            }
        } else if price <= low {
            (0.0, 0.0)
        } else if price >= high {
            (available, available)
        } else {
            let committed = available * (price - low) / (high - low);
            (committed, committed)
        }
    }
}

/// A production or consumption category inside a zone. Storages contribute
/// two sectors sharing one name: a load half (charging) and a generator half
/// (discharging).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sector {
    name: String,
    role: Role,
    is_storage: bool,
    controllable: bool,
    historical_power: TimeSeries,
    available_power: TimeSeries,
    price_model: Option<SectorPriceModel>,
    simulated_power: TimeSeries,
}

impl Sector {
    /// Historical powers are magnitudes (consumption positive for loads).
    /// Available power defaults to the historical magnitude until
    /// `set_availability` installs a dedicated series.
    pub fn new(name: String, role: Role, controllable: bool, historical_power: TimeSeries) -> Self {
        let available_power = historical_power.map_values(f64::abs);
        Self {
            name,
            role,
            is_storage: false,
            controllable,
            historical_power,
            available_power,
            price_model: None,
            simulated_power: TimeSeries::new(),
        }
    }

    pub(crate) fn new_storage_half(
        name: String,
        role: Role,
        controllable: bool,
        historical_power: TimeSeries,
    ) -> Self {
        let mut sector = Self::new(name, role, controllable, historical_power);
        sector.is_storage = true;
        sector
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_storage(&self) -> bool {
        self.is_storage
    }

    pub fn controllable(&self) -> bool {
        self.controllable
    }

    pub fn historical_power(&self) -> &TimeSeries {
        &self.historical_power
    }

    pub fn simulated_power(&self) -> &TimeSeries {
        &self.simulated_power
    }

    pub fn set_availability(&mut self, availability: TimeSeries) {
        self.available_power = availability;
    }

    /// Available power at a timestep; a missing sample means the sector
    /// cannot commit anything.
    pub fn available_at(&self, timestep: NaiveDateTime) -> f64 {
        self.available_power.value_at(timestep).unwrap_or(0.0).max(0.0)
    }

    pub fn set_price_model(&mut self, model: SectorPriceModel) -> Result<()> {
        model
            .validate(self.role)
            .with_context(|| format!("invalid price model for sector '{}'", self.name))?;
        self.price_model = Some(model);
        Ok(())
    }

    pub fn price_model(&self) -> Result<&SectorPriceModel> {
        self.price_model
            .as_ref()
            .with_context(|| format!("sector '{}' has no price model", self.name))
    }

    /// Net-export contribution when committing nothing: a load at full
    /// consumption, a generator at rest.
    pub fn floor(&self, available: f64) -> f64 {
        match self.role {
            Role::Generator => 0.0,
            Role::Load => -available,
        }
    }

    /// Merit-order tie-break used when several sectors step at the clearing
    /// price: keep real consumption intact first, preserve storage
    /// state-of-charge next, curtail real generation last.
    pub fn dispatch_priority(&self) -> u8 {
        match (self.role, self.is_storage) {
            (Role::Load, false) => 0,
            (Role::Generator, true) => 1,
            (Role::Load, true) => 2,
            (Role::Generator, false) => 3,
        }
    }

    pub fn record_power(&mut self, timestep: NaiveDateTime, power: f64) {
        self.simulated_power.push(timestep, power);
    }
}
