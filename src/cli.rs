use crate::record::MetricsRecord;
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Load generator statistics collector - folds per-agent metrics records
/// into one run and scores it against the driver's targets
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Run configuration of the driver (JSON)
    #[clap(short = 'c', long, help_heading = "Core Options")]
    pub config: PathBuf,

    /// Metrics record snapshots to fold (.json or .bin)
    #[clap(required = true, num_args = 1.., help_heading = "Core Options")]
    pub records: Vec<PathBuf>,

    /// Snapshot format, overriding detection by file extension
    #[clap(short = 'f', long, value_enum)]
    pub format: Option<SnapshotFormat>,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_FILE)]
    pub output_file: PathBuf,

    /// Also write the rendered driver summary to this file
    #[clap(long)]
    pub summary_text: Option<PathBuf>,

    /// Write the detail series (graphs and distributions) to this file
    #[clap(long)]
    pub detail: Option<PathBuf>,

    /// Worker threads for folding records (defaults to one per core)
    #[clap(short = 'j', long)]
    pub workers: Option<usize>,

    /// Exit with a non-zero status when the run fails its targets
    #[clap(long, default_value_t = false)]
    pub fail_on_violation: bool,

    /// Verbose output (repeat for more)
    #[clap(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Worker count to fold with, validated.
    pub fn fold_workers(&self) -> Result<usize> {
        let workers = self.workers.unwrap_or_else(crate::utils::default_workers);
        crate::utils::validate_workers(workers)?;
        Ok(workers)
    }
}

/// Encoding of a metrics record snapshot on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum SnapshotFormat {
    /// serde_json text
    #[clap(name = "json")]
    Json,

    /// bincode binary
    #[clap(name = "bin")]
    Bincode,
}

impl std::fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotFormat::Json => write!(f, "JSON"),
            SnapshotFormat::Bincode => write!(f, "bincode"),
        }
    }
}

impl SnapshotFormat {
    /// Pick the format of `path`, preferring an explicit override.
    pub fn resolve(path: &Path, explicit: Option<SnapshotFormat>) -> Result<Self> {
        if let Some(format) = explicit {
            return Ok(format);
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(SnapshotFormat::Json),
            Some("bin") | Some("bincode") => Ok(SnapshotFormat::Bincode),
            _ => bail!(
                "Cannot tell the snapshot format of {}; use --format",
                path.display()
            ),
        }
    }

    /// Decode a record and check that it is well formed.
    pub fn decode(self, bytes: &[u8]) -> Result<MetricsRecord> {
        let record: MetricsRecord = match self {
            SnapshotFormat::Json => serde_json::from_slice(bytes)?,
            SnapshotFormat::Bincode => bincode::deserialize(bytes)?,
        };
        record.validate().context("Malformed metrics record")?;
        Ok(record)
    }

    pub fn encode(self, record: &MetricsRecord) -> Result<Vec<u8>> {
        let bytes = match self {
            SnapshotFormat::Json => serde_json::to_vec_pretty(record)?,
            SnapshotFormat::Bincode => bincode::serialize(record)?,
        };
        Ok(bytes)
    }
}

/// Read and decode one snapshot file.
pub async fn load_snapshot(
    path: PathBuf,
    explicit: Option<SnapshotFormat>,
) -> Result<MetricsRecord> {
    let format = SnapshotFormat::resolve(&path, explicit)?;
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    format
        .decode(&bytes)
        .with_context(|| format!("Failed to decode {} snapshot {}", format, path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulate::SuccessSample;
    use crate::record::tests::{names, small_scheme};
    use crate::record::OpId;

    fn sample_record() -> MetricsRecord {
        let mut record = MetricsRecord::new(names(&["Browse", "Buy"]), small_scheme());
        record.record_success(&SuccessSample {
            op: OpId(1),
            invoke_time: 0,
            respond_time: 25,
            pause_time: 0,
            elapsed_since_run_start: 1_500,
            in_ramp: false,
        });
        record.record_failure(OpId(0), false);
        record
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "loadgen-stats",
            "-c",
            "run.json",
            "agent1.json",
            "agent2.bin",
            "-vv",
            "--fail-on-violation",
        ])
        .unwrap();

        assert_eq!(args.config, PathBuf::from("run.json"));
        assert_eq!(args.records.len(), 2);
        assert_eq!(args.verbose, 2);
        assert!(args.fail_on_violation);
        assert_eq!(args.output_file, PathBuf::from(crate::defaults::OUTPUT_FILE));
        assert!(args.fold_workers().unwrap() >= 1);
    }

    #[test]
    fn test_args_require_records() {
        assert!(Args::try_parse_from(["loadgen-stats", "-c", "run.json"]).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let args =
            Args::try_parse_from(["loadgen-stats", "-c", "run.json", "-j", "0", "a.json"]).unwrap();
        assert!(args.fold_workers().is_err());
    }

    #[test]
    fn test_format_resolution() {
        assert_eq!(
            SnapshotFormat::resolve(Path::new("a/b.json"), None).unwrap(),
            SnapshotFormat::Json
        );
        assert_eq!(
            SnapshotFormat::resolve(Path::new("b.bin"), None).unwrap(),
            SnapshotFormat::Bincode
        );
        assert_eq!(
            SnapshotFormat::resolve(Path::new("b.dat"), Some(SnapshotFormat::Json)).unwrap(),
            SnapshotFormat::Json
        );
        assert!(SnapshotFormat::resolve(Path::new("b.dat"), None).is_err());
    }

    #[test]
    fn test_snapshot_codecs_preserve_record() {
        let record = sample_record();
        for format in [SnapshotFormat::Json, SnapshotFormat::Bincode] {
            let bytes = format.encode(&record).unwrap();
            assert_eq!(format.decode(&bytes).unwrap(), record, "{}", format);
        }
        assert!(SnapshotFormat::Bincode.decode(b"garbage").is_err());
    }

    #[test]
    fn test_malformed_snapshot_is_rejected() {
        let mut value = serde_json::to_value(sample_record()).unwrap();
        value["resp_hist"]["cells"] = serde_json::json!([1, 0]);
        let bytes = serde_json::to_vec(&value).unwrap();

        let err = SnapshotFormat::Json.decode(&bytes).unwrap_err();
        assert!(format!("{:#}", err).contains("Malformed metrics record"), "{:#}", err);

        let mut value = serde_json::to_value(sample_record()).unwrap();
        value["stats"].as_array_mut().unwrap().pop();
        let bytes = SnapshotFormat::Bincode
            .encode(&serde_json::from_value(value).unwrap())
            .unwrap();
        assert!(SnapshotFormat::Bincode.decode(&bytes).is_err());
    }

    #[tokio::test]
    async fn test_load_snapshot_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        tokio::fs::write(&path, b"{").await.unwrap();

        let err = load_snapshot(path, None).await.unwrap_err();
        assert!(format!("{:#}", err).contains("agent.json"));
    }
}
