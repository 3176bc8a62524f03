use std::collections::HashMap;

use anyhow::{ensure, Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::opf_config::OpfConfig;
use crate::data::time_series::TimeSeries;
use crate::models::interconnection::Interconnection;
use crate::models::sector::{Role, SectorPriceModel};
use crate::models::zone::Zone;

/// Externally supplied price models for one sector name: a storage needs
/// both halves, a plain sector only the one matching its role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorModelEntry {
    pub load: Option<SectorPriceModel>,
    pub generator: Option<SectorPriceModel>,
}

impl SectorModelEntry {
    fn for_role(&self, role: Role) -> Option<SectorPriceModel> {
        match role {
            Role::Load => self.load,
            Role::Generator => self.generator,
        }
    }
}

/// Price models keyed zone name -> sector name.
pub type PriceModelSet = HashMap<String, HashMap<String, SectorModelEntry>>;

/// The energy network: an arena of zones and interconnections linked by
/// indices, plus the master datetime index the OPF iterates over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    zones: Vec<Zone>,
    zone_indices: HashMap<String, usize>,
    interconnections: Vec<Interconnection>,
    datetime_index: Option<Vec<NaiveDateTime>>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut [Zone] {
        &mut self.zones
    }

    pub fn interconnections_mut(&mut self) -> &mut [Interconnection] {
        &mut self.interconnections
    }

    pub fn interconnections(&self) -> &[Interconnection] {
        &self.interconnections
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zone_indices.get(name).map(|&i| &self.zones[i])
    }

    pub fn zone_index(&self, name: &str) -> Result<usize> {
        self.zone_indices
            .get(name)
            .copied()
            .with_context(|| format!("unknown zone '{name}'"))
    }

    /// Timesteps common to all zones' valid price data, in order.
    pub fn datetime_index(&self) -> &[NaiveDateTime] {
        self.datetime_index.as_deref().unwrap_or(&[])
    }

    /// Adds a zone and narrows the master datetime index to the timestamps
    /// where this zone also has a valid price.
    pub fn add_zone(&mut self, zone: Zone) -> Result<usize> {
        ensure!(
            !self.zone_indices.contains_key(zone.name()),
            "zone '{}' already exists",
            zone.name()
        );
        let valid: Vec<NaiveDateTime> = zone.historical_prices().timestamps().collect();
        self.datetime_index = Some(match self.datetime_index.take() {
            None => valid,
            Some(index) => zone.historical_prices().intersect_index(&index),
        });

        let index = self.zones.len();
        self.zone_indices.insert(zone.name().to_string(), index);
        self.zones.push(zone);
        Ok(index)
    }

    pub fn add_interconnection(
        &mut self,
        zone_from: &str,
        zone_to: &str,
        power_rating: f64,
        historical_flows: TimeSeries,
    ) -> Result<usize> {
        ensure!(
            zone_from != zone_to,
            "interconnection endpoints must differ, got '{zone_from}' twice"
        );
        ensure!(
            power_rating > 0.0,
            "interconnection {zone_from} -> {zone_to} needs a positive rating, got {power_rating}"
        );
        let from = self.zone_index(zone_from)?;
        let to = self.zone_index(zone_to)?;
        self.interconnections.push(Interconnection::new(
            from,
            to,
            zone_from.to_string(),
            zone_to.to_string(),
            power_rating,
            historical_flows,
        ));
        Ok(self.interconnections.len() - 1)
    }

    /// Installs price models on every sector. Controllable sectors must be
    /// covered by `models`; non-controllable ones fall back to the fixed
    /// shedding / must-run models from `cfg`.
    pub fn set_price_models(&mut self, models: &PriceModelSet, cfg: &OpfConfig) -> Result<()> {
        for zone in &mut self.zones {
            let zone_models = models.get(zone.name());
            let zone_name = zone.name().to_string();
            for sector in zone.sectors_mut() {
                let supplied = zone_models
                    .and_then(|m| m.get(sector.name()))
                    .and_then(|entry| entry.for_role(sector.role()));
                let model = match supplied {
                    Some(model) => model,
                    None if !sector.controllable() => default_model(sector.role(), cfg),
                    None => anyhow::bail!(
                        "no price model supplied for controllable sector '{}' ({}) in zone '{}'",
                        sector.name(),
                        sector.role(),
                        zone_name
                    ),
                };
                ensure!(
                    cfg.fake_cons_price <= model.price_no_power
                        && model.price_no_power <= cfg.fake_prod_price
                        && cfg.fake_cons_price <= model.price_full_power
                        && model.price_full_power <= cfg.fake_prod_price,
                    "price model for sector '{}' in zone '{}' leaves the admissible band [{}, {}]",
                    sector.name(),
                    zone_name,
                    cfg.fake_cons_price,
                    cfg.fake_prod_price
                );
                sector.set_price_model(model)?;
            }
        }
        Ok(())
    }
}

/// Fixed model for sectors that do not respond to price: loads shed at the
/// demand price, generators run whenever the market is above the floor.
pub fn default_model(role: Role, cfg: &OpfConfig) -> SectorPriceModel {
    match role {
        Role::Load => SectorPriceModel::new(cfg.demand_price, cfg.demand_price),
        Role::Generator => SectorPriceModel::new(cfg.fake_cons_price, cfg.fake_cons_price),
    }
}
