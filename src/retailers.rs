use core::fmt;
use std::str::FromStr;

use anyhow::bail;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Precision;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Retailer {
    Coles,
    Woolworths,
}

impl fmt::Display for Retailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Retailer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "coles" => Self::Coles,
            "woolworths" => Self::Woolworths,
            _ => bail!("Unknown retailer: {s}"),
        })
    }
}

impl Retailer {
    pub fn all() -> Vec<Self> {
        vec![Retailer::Coles, Retailer::Woolworths]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Coles => "Coles",
            Self::Woolworths => "Woolworths",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Self::Coles => "coles",
            Self::Woolworths => "woolworths",
        }
    }

    /// Checkpoint precision used when a job doesn't configure one.
    ///
    /// The Coles scraper has always rounded its progress to 2 decimal places
    /// while Woolworths kept the raw coordinate. Both are kept as-is; set
    /// `precision` on the job to change either.
    pub fn checkpoint_precision(&self) -> Precision {
        match self {
            Self::Coles => Precision::Decimals(2),
            Self::Woolworths => Precision::Full,
        }
    }
}
