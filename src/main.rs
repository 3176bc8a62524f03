use std::error::Error;
use std::path::Path;

use clap::Parser;

use zonalflow::analysis::price_fitting::fit_network_models;
use zonalflow::analysis::reporting::print_batch_report;
use zonalflow::cli::cli::Args;
use zonalflow::config::opf_config::{FitConfig, OpfConfig};
use zonalflow::core::batch::run_batch;
use zonalflow::data::network_loader::load_network;
use zonalflow::models::network::PriceModelSet;
use zonalflow::utils::csv_export::CsvExporter;
use zonalflow::utils::logging;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Parse command line arguments
    let args = Args::parse();

    logging::init_logging(args.enable_timing());

    println!("Zonal Electricity Market OPF Simulator");
    println!(
        "Data: {}, output: {}, parallel: {}",
        args.data_dir(),
        args.output_dir(),
        if args.parallel() { "enabled" } else { "disabled" }
    );

    let cfg = OpfConfig::default();
    let mut network = load_network(Path::new(args.data_dir()))?;
    println!(
        "Loaded {} zones, {} interconnections, {} timesteps",
        network.zones().len(),
        network.interconnections().len(),
        network.datetime_index().len()
    );

    // Price models either come from a JSON file or are fitted from the
    // historical data; both paths go through the same validation.
    let models: PriceModelSet = if let Some(path) = args.price_models() {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(file)?
    } else if args.fit_prices() {
        let models = fit_network_models(&network, &FitConfig::default(), cfg.tol)?;
        println!("Fitted price models for {} zones", models.len());
        models
    } else {
        PriceModelSet::new()
    };
    network.set_price_models(&models, &cfg)?;

    let report = run_batch(&mut network, &cfg, args.parallel(), args.limit())?;
    print_batch_report(&network, &report);

    let exporter = CsvExporter::new(args.output_dir())?;
    exporter.export_results(&network, &report)?;
    println!("Results written to {}", exporter.output_dir().display());

    logging::print_timing_report();

    Ok(())
}
