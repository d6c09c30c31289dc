use std::{collections::BTreeMap, fs::read_to_string, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    checkpoint::{CheckpointStore, Precision},
    grid::{Grid, Region, Step},
    locator::LocatorConfig,
    retailers::Retailer,
    scanner::{FailurePolicy, ScanJob},
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub jobs: BTreeMap<Retailer, JobConfig>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("internal")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default = "Region::australia")]
    pub region: Region,
    pub step: Step,
    /// Defaults to the retailer's historical precision.
    #[serde(default)]
    pub precision: Option<Precision>,
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    #[serde(default)]
    pub on_lookup_failure: FailurePolicy,
    #[serde(default)]
    pub clear_on_finish: bool,
    pub locator: LocatorConfig,
}

fn default_checkpoint_every() -> usize {
    1
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn job(&self, retailer: Retailer) -> Result<&JobConfig> {
        self.jobs
            .get(&retailer)
            .with_context(|| format!("no scan job configured for {}", retailer.slug()))
    }

    pub fn checkpoints(&self, retailer: Retailer) -> Result<CheckpointStore> {
        let precision = self
            .job(retailer)?
            .precision
            .unwrap_or_else(|| retailer.checkpoint_precision());
        Ok(CheckpointStore::new(&self.data_dir).with_precision(precision))
    }

    pub fn store_dir(&self, retailer: Retailer) -> PathBuf {
        self.data_dir.join(format!("{}-stores", retailer.slug()))
    }

    pub fn journal_path(&self, retailer: Retailer) -> PathBuf {
        self.store_dir(retailer).join("found.jsonl")
    }

    pub fn output_path(&self, retailer: Retailer) -> PathBuf {
        self.store_dir(retailer).join("output.jsonl")
    }
}

impl JobConfig {
    pub fn scan_job(&self, retailer: Retailer) -> Result<ScanJob> {
        let grid = Grid::new(self.region, self.step)
            .with_context(|| format!("invalid grid for {}", retailer.slug()))?;
        Ok(ScanJob {
            name: retailer.slug().to_string(),
            grid,
            checkpoint_every: self.checkpoint_every,
            on_failure: self.on_lookup_failure,
            clear_on_finish: self.clear_on_finish,
        })
    }
}
