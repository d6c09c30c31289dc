//! Store lookups against JSON store locator endpoints.
//!
//! Nothing here is specific to one retailer: the request URL and where the
//! stores sit in the response both come from the job config.

use std::{thread, time::Duration};

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use ureq::{Agent, AgentBuilder};

use crate::{coordinate::Coordinate, scanner::StoreLookup, stores::LocatedStore};

const USER_AGENT: &str = concat!("store-scan/", env!("CARGO_PKG_VERSION"));
const RETRY_BACKOFF_MS: u64 = 1000;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocatorConfig {
    /// Request URL with `{lat}` and `{lon}` placeholders.
    pub url: String,
    /// JSON pointer to the array of stores; empty for a top-level array.
    #[serde(default)]
    pub stores: String,
    // field names inside each store, or JSON pointers when they start with '/'
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default = "default_lat")]
    pub lat: String,
    #[serde(default = "default_lon")]
    pub lon: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_id() -> String {
    "id".to_string()
}

fn default_lat() -> String {
    "lat".to_string()
}

fn default_lon() -> String {
    "lon".to_string()
}

fn default_retries() -> u32 {
    2
}

fn default_timeout() -> u64 {
    30
}

pub struct JsonLocator {
    agent: Agent,
    config: LocatorConfig,
    requested: bool,
}

impl JsonLocator {
    pub fn new(config: LocatorConfig) -> Result<Self> {
        ensure!(
            config.url.contains("{lat}") && config.url.contains("{lon}"),
            "locator url needs {{lat}} and {{lon}}: {}",
            config.url
        );

        let agent = AgentBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Ok(Self {
            agent,
            config,
            requested: false,
        })
    }

    pub fn url(&self, at: Coordinate) -> String {
        self.config
            .url
            .replace("{lat}", &at.lat().to_string())
            .replace("{lon}", &at.lon().to_string())
    }

    fn fetch(&self, url: &str) -> Result<Value> {
        Ok(self.agent.get(url).call()?.into_json()?)
    }
}

impl StoreLookup for JsonLocator {
    type Store = LocatedStore;

    fn lookup(&mut self, at: Coordinate) -> Result<Vec<LocatedStore>> {
        if self.requested && self.config.delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.delay_ms));
        }
        self.requested = true;

        let url = self.url(at);
        let mut attempt = 0;
        let body = loop {
            match self.fetch(&url) {
                Ok(x) => break x,
                Err(e) if attempt < self.config.retries => {
                    attempt += 1;
                    warn!(%url, attempt, error = format!("{e:#}"), "locator request failed, retrying");
                    thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64));
                }
                Err(e) => return Err(e.context(format!("GET {url}"))),
            }
        };

        extract_stores(&body, &self.config).with_context(|| format!("unexpected response from {url}"))
    }
}

/// Pulls stores out of a locator response.
pub fn extract_stores(body: &Value, config: &LocatorConfig) -> Result<Vec<LocatedStore>> {
    let list = body
        .pointer(&config.stores)
        .with_context(|| format!("no stores at {:?}", config.stores))?;
    let list = match list {
        Value::Array(x) => x,
        // some locators send null instead of an empty list
        Value::Null => return Ok(Vec::new()),
        _ => bail!("stores at {:?} aren't a list", config.stores),
    };

    let mut output = Vec::new();
    for (i, x) in list.iter().enumerate() {
        let id = match field(x, &config.id) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => bail!("store #{i} has no {:?}", config.id),
        };
        let lat = number(x, &config.lat).with_context(|| format!("store {id}"))?;
        let lon = number(x, &config.lon).with_context(|| format!("store {id}"))?;
        let name = config
            .name
            .as_ref()
            .and_then(|name| field(x, name))
            .and_then(Value::as_str)
            .map(|x| x.trim().to_string());

        output.push(LocatedStore { id, lat, lon, name });
    }
    Ok(output)
}

fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    if name.starts_with('/') {
        value.pointer(name)
    } else {
        value.get(name)
    }
}

fn number(value: &Value, name: &str) -> Result<f64> {
    let x = match field(value, name) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    x.with_context(|| format!("missing or invalid {name:?}"))
}
