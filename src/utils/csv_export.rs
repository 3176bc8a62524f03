use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};

use crate::core::batch::BatchReport;
use crate::models::network::Network;
use crate::models::zone::Zone;
use crate::utils::logging::{self, FileIOType, OperationCategory};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Writes simulation results under a timestamped subdirectory of the output
/// directory: one prices file, one powers file per zone, one flows file and a
/// convergence report.
pub struct CsvExporter {
    output_dir: PathBuf,
}

impl CsvExporter {
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let full_path = output_dir.as_ref().join(timestamp);
        std::fs::create_dir_all(&full_path)
            .with_context(|| format!("creating output directory {}", full_path.display()))?;
        Ok(Self {
            output_dir: full_path,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn export_results(&self, network: &Network, report: &BatchReport) -> Result<()> {
        let _timing = logging::start_timing(
            "export_results",
            OperationCategory::FileIO {
                subcategory: FileIOType::ResultsSave,
            },
        );
        self.export_prices(network)?;
        for zone in network.zones() {
            self.export_zone_powers(zone)?;
        }
        self.export_flows(network)?;
        self.export_convergence(network, report)?;
        Ok(())
    }

    /// Timesteps with no value (non-converged ones) produce empty cells.
    fn export_prices(&self, network: &Network) -> Result<()> {
        let path = self.output_dir.join("prices.csv");
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;

        let mut header = vec!["timestamp".to_string()];
        header.extend(network.zones().iter().map(|z| z.name().to_string()));
        writer.write_record(&header)?;

        for &timestep in network.datetime_index() {
            let mut record = vec![timestep.format(TIMESTAMP_FORMAT).to_string()];
            for zone in network.zones() {
                record.push(format_value(zone.simulated_prices().value_at(timestep)));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn export_zone_powers(&self, zone: &Zone) -> Result<()> {
        let path = self.output_dir.join(format!("powers_{}.csv", zone.name()));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;

        // Storage halves share a name, so the role disambiguates the column.
        let mut header = vec!["timestamp".to_string()];
        header.extend(
            zone.sectors()
                .iter()
                .map(|s| format!("{}_{}", s.name(), s.role())),
        );
        writer.write_record(&header)?;

        let timesteps: Vec<NaiveDateTime> = zone.simulated_prices().timestamps().collect();
        for timestep in timesteps {
            let mut record = vec![timestep.format(TIMESTAMP_FORMAT).to_string()];
            for sector in zone.sectors() {
                record.push(format_value(sector.simulated_power().value_at(timestep)));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn export_flows(&self, network: &Network) -> Result<()> {
        if network.interconnections().is_empty() {
            return Ok(());
        }
        let path = self.output_dir.join("flows.csv");
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;

        let mut header = vec!["timestamp".to_string()];
        header.extend(
            network
                .interconnections()
                .iter()
                .map(|l| format!("{}->{}", l.zone_from_name(), l.zone_to_name())),
        );
        writer.write_record(&header)?;

        for &timestep in network.datetime_index() {
            let mut record = vec![timestep.format(TIMESTAMP_FORMAT).to_string()];
            for line in network.interconnections() {
                record.push(format_value(line.simulated_flows().value_at(timestep)));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn export_convergence(&self, network: &Network, report: &BatchReport) -> Result<()> {
        let path = self.output_dir.join("convergence.csv");
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("creating {}", path.display()))?;

        writer.write_record(["timestamp", "converged"])?;
        for &timestep in network.datetime_index() {
            let converged = !report.failed.contains(&timestep);
            writer.write_record([
                timestep.format(TIMESTAMP_FORMAT).to_string(),
                converged.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    use crate::config::opf_config::OpfConfig;
    use crate::core::batch::run_batch;
    use crate::data::time_series::TimeSeries;
    use crate::models::sector::{Role, SectorPriceModel};

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn solved_network() -> (Network, BatchReport) {
        let mut network = Network::new();
        let mut zone = Zone::new(
            "A",
            TimeSeries::from_samples(vec![(ts(0), 25.0), (ts(1), 25.0)]),
        );
        zone.add_sector(
            "gas",
            Role::Generator,
            true,
            TimeSeries::from_samples(vec![(ts(0), 100.0), (ts(1), 100.0)]),
        );
        zone.add_sector(
            "demand",
            Role::Load,
            false,
            TimeSeries::from_samples(vec![(ts(0), 40.0), (ts(1), 60.0)]),
        );
        zone.sectors_mut()[0]
            .set_price_model(SectorPriceModel::new(10.0, 30.0))
            .unwrap();
        zone.sectors_mut()[1]
            .set_price_model(SectorPriceModel::new(3000.0, 3000.0))
            .unwrap();
        network.add_zone(zone).unwrap();
        let report = run_batch(&mut network, &OpfConfig::default(), false, None).unwrap();
        (network, report)
    }

    #[test]
    fn exports_prices_powers_and_convergence() {
        let (network, report) = solved_network();
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path()).unwrap();
        exporter.export_results(&network, &report).unwrap();

        let prices = std::fs::read_to_string(exporter.output_dir().join("prices.csv")).unwrap();
        assert!(prices.starts_with("timestamp,A"));
        assert_eq!(prices.lines().count(), 3);

        let powers =
            std::fs::read_to_string(exporter.output_dir().join("powers_A.csv")).unwrap();
        assert!(powers.contains("gas_generator"));
        assert!(powers.contains("demand_load"));

        let convergence =
            std::fs::read_to_string(exporter.output_dir().join("convergence.csv")).unwrap();
        assert!(convergence.contains("true"));
        // No interconnections means no flows file.
        assert!(!exporter.output_dir().join("flows.csv").exists());
    }
}
