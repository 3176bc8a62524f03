// Main module declarations for zonalflow

// Core solver modules
pub mod core {
    pub mod cost_function;
    pub mod line_export;
    pub mod opf;
    pub mod batch;
}

// Configuration modules
pub mod config {
    pub mod constants;
    pub mod opf_config;
}

// Model definitions
pub mod models {
    pub mod sector;
    pub mod storage;
    pub mod zone;
    pub mod interconnection;
    pub mod network;
}

// Data loaders
pub mod data {
    pub mod time_series;
    pub mod network_loader;
}

// Analysis and fitting
pub mod analysis {
    pub mod price_fitting;
    pub mod reporting;
}

// Utility functions
pub mod utils {
    pub mod logging;
    pub mod csv_export;
}

// CLI interface
pub mod cli {
    pub mod cli;
}

// Re-export commonly used types
pub use crate::config::opf_config::{FitConfig, OpfConfig};
pub use crate::core::batch::run_batch;
pub use crate::core::opf::{OpfOutcome, OpfSolution};
pub use crate::models::network::Network;
pub use crate::models::sector::Role;
