use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDateTime;
use csv::ReaderBuilder;

use crate::data::time_series::TimeSeries;
use crate::models::network::Network;
use crate::models::sector::Role;
use crate::models::zone::Zone;
use crate::utils::logging::{self, FileIOType, OperationCategory};

#[derive(Debug)]
pub enum NetworkLoadError {
    IoError(std::io::Error),
    CsvError(csv::Error),
    InvalidTimestamp(String),
    InvalidValue(String),
    InvalidSectorKind(String),
    MissingColumn(String),
    InvalidNetwork(String),
}

impl From<std::io::Error> for NetworkLoadError {
    fn from(err: std::io::Error) -> Self {
        NetworkLoadError::IoError(err)
    }
}

impl From<csv::Error> for NetworkLoadError {
    fn from(err: csv::Error) -> Self {
        NetworkLoadError::CsvError(err)
    }
}

impl std::fmt::Display for NetworkLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkLoadError::IoError(e) => write!(f, "IO error: {}", e),
            NetworkLoadError::CsvError(e) => write!(f, "CSV error: {}", e),
            NetworkLoadError::InvalidTimestamp(s) => write!(f, "Invalid timestamp: {}", s),
            NetworkLoadError::InvalidValue(s) => write!(f, "Invalid numeric value: {}", s),
            NetworkLoadError::InvalidSectorKind(s) => write!(f, "Invalid sector kind: {}", s),
            NetworkLoadError::MissingColumn(s) => write!(f, "Missing column: {}", s),
            NetworkLoadError::InvalidNetwork(s) => write!(f, "Invalid network: {}", s),
        }
    }
}

impl std::error::Error for NetworkLoadError {}

/// `kind` column of the sectors manifest. A storage row expands into the
/// load and generator halves of one storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectorKind {
    Load,
    Generator,
    Storage,
}

impl FromStr for SectorKind {
    type Err = NetworkLoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "load" => Ok(SectorKind::Load),
            "generator" => Ok(SectorKind::Generator),
            "storage" => Ok(SectorKind::Storage),
            _ => Err(NetworkLoadError::InvalidSectorKind(s.to_string())),
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, NetworkLoadError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .map_err(|_| NetworkLoadError::InvalidTimestamp(raw.to_string()))
}

/// Reads a wide CSV (timestamp column + one value column per name) into one
/// series per column. Empty and NaN cells are skipped, not errors: the
/// datetime-index intersection deals with the gaps.
fn read_wide_series(path: &Path) -> Result<Vec<(String, TimeSeries)>, NetworkLoadError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let names: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();
    let mut columns: Vec<Vec<(NaiveDateTime, f64)>> = vec![Vec::new(); names.len()];

    for result in reader.records() {
        let record = result?;
        let raw_timestamp = record
            .get(0)
            .ok_or_else(|| NetworkLoadError::MissingColumn("timestamp".to_string()))?;
        let timestep = parse_timestamp(raw_timestamp)?;
        for (i, column) in columns.iter_mut().enumerate() {
            let cell = record.get(i + 1).unwrap_or("");
            if cell.trim().is_empty() {
                continue;
            }
            let value: f64 = cell
                .trim()
                .parse()
                .map_err(|_| NetworkLoadError::InvalidValue(cell.to_string()))?;
            if value.is_nan() {
                continue;
            }
            column.push((timestep, value));
        }
    }

    Ok(names
        .into_iter()
        .zip(columns)
        .map(|(name, samples)| (name, TimeSeries::from_samples(samples)))
        .collect())
}

struct SectorRow {
    zone: String,
    sector: String,
    kind: SectorKind,
    controllable: bool,
}

fn read_sector_manifest(path: &Path) -> Result<Vec<SectorRow>, NetworkLoadError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let field = |i: usize, name: &str| -> Result<String, NetworkLoadError> {
            record
                .get(i)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| NetworkLoadError::MissingColumn(name.to_string()))
        };
        let controllable_raw = field(3, "controllable")?;
        let controllable = controllable_raw
            .to_lowercase()
            .parse::<bool>()
            .map_err(|_| NetworkLoadError::InvalidValue(controllable_raw.clone()))?;
        rows.push(SectorRow {
            zone: field(0, "zone")?,
            sector: field(1, "sector")?,
            kind: field(2, "kind")?.parse()?,
            controllable,
        });
    }
    Ok(rows)
}

/// Loads a network from a data directory:
///
/// - `prices.csv`: timestamp plus one historical price column per zone; the
///   column order fixes the zone order.
/// - `sectors.csv`: `zone, sector, kind, controllable` manifest.
/// - `powers_<zone>.csv`: timestamp plus one historical power column per
///   sector (signed for storages, magnitudes otherwise).
/// - `interconnections.csv` (optional): `zone_from, zone_to, power_rating`.
/// - `flows_<from>_<to>.csv` (optional): historical reference flows.
pub fn load_network(data_dir: &Path) -> Result<Network, NetworkLoadError> {
    let _timing = logging::start_timing(
        "load_network",
        OperationCategory::FileIO {
            subcategory: FileIOType::DataLoad,
        },
    );

    let prices = read_wide_series(&data_dir.join("prices.csv"))?;
    let manifest = read_sector_manifest(&data_dir.join("sectors.csv"))?;

    let mut network = Network::new();
    for (zone_name, zone_prices) in prices {
        let mut zone = Zone::new(&zone_name, zone_prices);

        let powers: HashMap<String, TimeSeries> =
            read_wide_series(&data_dir.join(format!("powers_{zone_name}.csv")))?
                .into_iter()
                .collect();

        for row in manifest.iter().filter(|r| r.zone == zone_name) {
            let series = powers.get(&row.sector).ok_or_else(|| {
                NetworkLoadError::MissingColumn(format!(
                    "powers_{zone_name}.csv has no column '{}'",
                    row.sector
                ))
            })?;
            match row.kind {
                SectorKind::Storage => zone.add_storage(&row.sector, row.controllable, series),
                SectorKind::Load => {
                    zone.add_sector(&row.sector, Role::Load, row.controllable, series.clone())
                }
                SectorKind::Generator => {
                    zone.add_sector(&row.sector, Role::Generator, row.controllable, series.clone())
                }
            }
        }

        network
            .add_zone(zone)
            .map_err(|e| NetworkLoadError::InvalidNetwork(e.to_string()))?;
    }

    let interconnections_path = data_dir.join("interconnections.csv");
    if interconnections_path.exists() {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&interconnections_path)?;
        for result in reader.records() {
            let record = result?;
            let zone_from = record
                .get(0)
                .map(str::trim)
                .ok_or_else(|| NetworkLoadError::MissingColumn("zone_from".to_string()))?;
            let zone_to = record
                .get(1)
                .map(str::trim)
                .ok_or_else(|| NetworkLoadError::MissingColumn("zone_to".to_string()))?;
            let rating_raw = record
                .get(2)
                .map(str::trim)
                .ok_or_else(|| NetworkLoadError::MissingColumn("power_rating".to_string()))?;
            let power_rating: f64 = rating_raw
                .parse()
                .map_err(|_| NetworkLoadError::InvalidValue(rating_raw.to_string()))?;

            let flows_path = data_dir.join(format!("flows_{zone_from}_{zone_to}.csv"));
            let historical_flows = if flows_path.exists() {
                read_wide_series(&flows_path)?
                    .into_iter()
                    .next()
                    .map(|(_, series)| series)
                    .unwrap_or_default()
            } else {
                TimeSeries::new()
            };

            network
                .add_interconnection(zone_from, zone_to, power_rating, historical_flows)
                .map_err(|e| NetworkLoadError::InvalidNetwork(e.to_string()))?;
        }
    }

    Ok(network)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn seed_two_zone_dir(dir: &Path) {
        write_file(
            dir,
            "prices.csv",
            "timestamp,A,B\n\
             2019-06-01 00:00:00,25.0,30.0\n\
             2019-06-01 01:00:00,28.0,\n\
             2019-06-01 02:00:00,26.0,31.0\n",
        );
        write_file(
            dir,
            "sectors.csv",
            "zone,sector,kind,controllable\n\
             A,gas,generator,true\n\
             A,demand,load,false\n\
             A,battery,storage,true\n\
             B,demand,load,false\n",
        );
        write_file(
            dir,
            "powers_A.csv",
            "timestamp,gas,demand,battery\n\
             2019-06-01 00:00:00,80.0,50.0,-10.0\n\
             2019-06-01 01:00:00,90.0,55.0,5.0\n\
             2019-06-01 02:00:00,85.0,52.0,0.0\n",
        );
        write_file(
            dir,
            "powers_B.csv",
            "timestamp,demand\n\
             2019-06-01 00:00:00,40.0\n\
             2019-06-01 01:00:00,42.0\n\
             2019-06-01 02:00:00,41.0\n",
        );
        write_file(dir, "interconnections.csv", "zone_from,zone_to,power_rating\nA,B,100.0\n");
    }

    #[test]
    fn loads_zones_sectors_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        seed_two_zone_dir(dir.path());

        let network = load_network(dir.path()).unwrap();
        assert_eq!(network.zones().len(), 2);
        // Zone B has no price at 01:00, so the shared index skips that hour.
        assert_eq!(network.datetime_index().len(), 2);

        let zone_a = network.zone("A").unwrap();
        // gas + demand + two battery halves.
        assert_eq!(zone_a.sectors().len(), 4);
        let battery_halves: Vec<_> = zone_a
            .sectors()
            .iter()
            .filter(|s| s.name() == "battery")
            .collect();
        assert_eq!(battery_halves.len(), 2);
        assert!(battery_halves.iter().all(|s| s.is_storage()));

        assert_eq!(network.interconnections().len(), 1);
        assert_eq!(network.interconnections()[0].power_rating(), 100.0);
    }

    #[test]
    fn missing_power_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        seed_two_zone_dir(dir.path());
        write_file(
            dir.path(),
            "powers_B.csv",
            "timestamp,other\n2019-06-01 00:00:00,40.0\n",
        );

        let err = load_network(dir.path()).unwrap_err();
        assert!(matches!(err, NetworkLoadError::MissingColumn(_)));
    }

    #[test]
    fn short_timestamp_format_is_accepted() {
        assert!(parse_timestamp("2019-06-01 00:00").is_ok());
        assert!(parse_timestamp("01/06/2019").is_err());
    }

    #[test]
    fn bad_sector_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        seed_two_zone_dir(dir.path());
        write_file(
            dir.path(),
            "sectors.csv",
            "zone,sector,kind,controllable\nA,gas,windmill,true\n",
        );

        let err = load_network(dir.path()).unwrap_err();
        assert!(matches!(err, NetworkLoadError::InvalidSectorKind(_)));
    }
}
