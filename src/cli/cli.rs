use clap::Parser;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, default_value = "data")]
    data_dir: String,

    #[arg(short, long, default_value = "results")]
    output_dir: String,

    #[arg(short, long, default_value_t = true)]
    parallel: bool,

    #[arg(long, default_value_t = false)]
    enable_timing: bool,

    #[arg(long, help = "Fit sector price models from historical data", default_value_t = false)]
    fit_prices: bool,

    #[arg(long, help = "JSON file with externally supplied price models")]
    price_models: Option<String>,

    #[arg(short, long, help = "Only solve the first N timesteps")]
    limit: Option<usize>,
}

// Add getter methods for all fields
impl Args {
    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &str {
        &self.output_dir
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn enable_timing(&self) -> bool {
        self.enable_timing
    }

    pub fn fit_prices(&self) -> bool {
        self.fit_prices
    }

    pub fn price_models(&self) -> Option<&str> {
        self.price_models.as_deref()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}
