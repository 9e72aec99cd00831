use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Exercise a running ingestion/processing deployment and record the results
#[derive(Debug, Clone, Parser)]
#[command(name = "harness", version, about)]
pub struct Args {
    /// Base URL of the ingestion service
    #[arg(long)]
    pub ingest_url: String,

    /// Base URL of the processing service (defaults to the ingestion URL)
    #[arg(long)]
    pub process_url: Option<String>,

    /// Where to write the JSON results
    #[arg(long, default_value = "demonstration_results.json")]
    pub output: PathBuf,

    /// Where to write the human-readable summary
    #[arg(long, default_value = "demonstration_summary.txt")]
    pub summary: PathBuf,

    /// Parallel calls issued by the concurrency test
    #[arg(long, default_value_t = 10)]
    pub concurrency: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Pause between the cold and warm calls, in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub warm_pause_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn process_url(&self) -> &str {
        self.process_url.as_deref().unwrap_or(&self.ingest_url)
    }

    pub fn settings(&self) -> RunSettings {
        RunSettings {
            concurrency: self.concurrency.max(1),
            warm_pause: Duration::from_millis(self.warm_pause_ms),
        }
    }
}

/// Knobs for a single harness run
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub concurrency: usize,
    pub warm_pause: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            warm_pause: Duration::from_secs(2),
        }
    }
}
