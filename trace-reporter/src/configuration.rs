//! Configuration for trace reporting.
use std::path::Path;
use std::time::Duration;

use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::error::Error;

pub(crate) const DEFAULT_APOLLO_USAGE_REPORTING_INGRESS_URL: &str =
    "https://usage-reporting.api.apollographql.com/api/ingress/traces";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_QUEUED_REPORTS: usize = 16;
// Arbitrary, it only decides when a flush happens ahead of the timer.
const DEFAULT_BATCH_TRIGGER: usize = 50;
const DEFAULT_MAX_DEPTH: usize = 64;

/// How resolver spans are arranged under the operation root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Nesting {
    /// Every resolver becomes a direct child of the operation.
    #[default]
    Flat,
    /// Resolvers are nested by their response path.
    PathAware,
}

/// Trace reporting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Turn reporting off without touching anything else.
    pub enabled: bool,

    /// Deployment stage the traces belong to, e.g. `current`.
    pub schema_tag: String,

    /// Identifies this reporting instance. Defaults to the machine hostname.
    pub hostname: Option<String>,

    /// Collector ingress URL.
    #[schemars(with = "Option<String>")]
    pub endpoint: Option<Url>,

    /// Key used to authenticate with the collector. Read from `APOLLO_KEY` when unset.
    #[serde(skip_serializing)]
    pub apollo_key: Option<String>,

    /// How resolver spans are nested in the trace tree.
    pub nesting: Nesting,

    /// Deepest response path accepted when nesting by path.
    pub max_depth: usize,

    /// Timeout for a single delivery attempt, in human-readable format; defaults to 5s.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub timeout: Duration,

    /// Delivery attempts per report before it is dropped.
    pub max_attempts: u32,

    /// How often accumulated traces are flushed, in human-readable format; defaults to 5s.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub batch_interval: Duration,

    /// Flush early once this many traces are waiting.
    pub batch_trigger: usize,

    /// Reports allowed to wait for delivery at once. Newer ones are dropped beyond that.
    pub max_queued_reports: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            schema_tag: "current".to_string(),
            hostname: None,
            endpoint: None,
            apollo_key: None,
            nesting: Nesting::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_interval: DEFAULT_BATCH_INTERVAL,
            batch_trigger: DEFAULT_BATCH_TRIGGER,
            max_queued_reports: DEFAULT_MAX_QUEUED_REPORTS,
        }
    }
}

impl Config {
    /// Read a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration.
    pub fn from_yaml(content: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_queued_reports == 0 {
            return Err(Error::Configuration(
                "max_queued_reports must be at least 1".to_string(),
            ));
        }
        if self.batch_interval.is_zero() {
            return Err(Error::Configuration(
                "batch_interval must not be zero".to_string(),
            ));
        }
        if self.nesting == Nesting::PathAware && self.max_depth == 0 {
            return Err(Error::Configuration(
                "max_depth must be at least 1 when nesting is path_aware".to_string(),
            ));
        }
        Ok(())
    }

    /// The collector URL, falling back to `APOLLO_USAGE_REPORTING_INGRESS_URL` then the default ingress.
    pub fn endpoint(&self) -> Result<Url, Error> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        let ingress = std::env::var("APOLLO_USAGE_REPORTING_INGRESS_URL")
            .unwrap_or_else(|_| DEFAULT_APOLLO_USAGE_REPORTING_INGRESS_URL.to_string());
        Url::parse(&ingress).map_err(|e| Error::Configuration(format!("{ingress}: {e}")))
    }

    pub fn apollo_key(&self) -> Option<String> {
        self.apollo_key
            .clone()
            .or_else(|| std::env::var("APOLLO_KEY").ok())
    }

    pub fn hostname(&self) -> Result<String, Error> {
        match &self.hostname {
            Some(hostname) => Ok(hostname.clone()),
            None => Ok(sys_info::hostname()?),
        }
    }
}

/// JSON schema of [`Config`], for editors and validation.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
    });
    settings.into_generator().into_root_schema_for::<Config>()
}
