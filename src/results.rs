use crate::report::render_summary;
use crate::scoring::DriverSummary;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Scored results of one driver together with where they came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverResults {
    pub summary: DriverSummary,
    /// Number of record snapshots folded into this result.
    pub records_merged: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DriverResults {
    pub fn new(summary: DriverSummary, records_merged: usize) -> Self {
        Self {
            summary,
            records_merged,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub collector_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            collector_version: crate::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub report_id: String,
    pub total_drivers: usize,
    pub system_info: SystemInfo,
}

/// Everything written to the output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResults {
    pub metadata: ResultsMetadata,
    pub drivers: Vec<DriverResults>,
    /// True when every driver passed.
    pub passed: bool,
}

/// Collects driver results and writes the run outputs
pub struct ResultsManager {
    output_file: PathBuf,
    summary_file: Option<PathBuf>,
    report_id: String,
    results: Vec<DriverResults>,
}

impl ResultsManager {
    /// Create a new results manager
    pub fn new(output_file: &Path) -> Result<Self> {
        Ok(Self {
            output_file: output_file.to_path_buf(),
            summary_file: None,
            report_id: Uuid::new_v4().to_string(),
            results: Vec::new(),
        })
    }

    /// Also write the rendered summary text on finalize
    pub fn enable_summary_text<P: AsRef<Path>>(&mut self, summary_file: P) {
        self.summary_file = Some(summary_file.as_ref().to_path_buf());
        debug!("Summary text enabled: {:?}", self.summary_file);
    }

    pub fn report_id(&self) -> &str {
        &self.report_id
    }

    pub fn results(&self) -> &[DriverResults] {
        &self.results
    }

    /// Add the results of one driver
    pub fn add_results(&mut self, results: DriverResults) {
        info!(
            "Adding results for driver '{}' ({} records, passed = {})",
            results.summary.driver_name, results.records_merged, results.summary.passed
        );
        self.results.push(results);
    }

    /// True when every driver added so far passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.summary.passed)
    }

    /// Write the JSON results and, if enabled, the summary text
    pub fn finalize(&self) -> Result<FinalResults> {
        info!("Finalizing run results");

        let final_results = FinalResults {
            metadata: ResultsMetadata {
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                report_id: self.report_id.clone(),
                total_drivers: self.results.len(),
                system_info: SystemInfo::default(),
            },
            drivers: self.results.clone(),
            passed: self.all_passed(),
        };

        let json = serde_json::to_string_pretty(&final_results)?;
        std::fs::write(&self.output_file, json)
            .with_context(|| format!("Failed to write results to {}", self.output_file.display()))?;
        info!("Results written to: {:?}", self.output_file);

        if let Some(summary_file) = &self.summary_file {
            std::fs::write(summary_file, self.summary_text())
                .with_context(|| format!("Failed to write summary to {}", summary_file.display()))?;
            info!("Summary written to: {:?}", summary_file);
        }

        Ok(final_results)
    }

    /// All driver summaries wrapped in one `benchSummary` block.
    pub fn summary_text(&self) -> String {
        let mut text = format!("<benchSummary name=\"{}\">\n", self.report_id);
        for results in &self.results {
            text.push_str(&render_summary(&results.summary));
        }
        text.push_str("</benchSummary>\n");
        text
    }
}
