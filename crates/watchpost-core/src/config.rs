use crate::diff::{FieldWeight, FieldWeights};
use crate::error::{Result, WatchpostError};
use crate::gate::{ConfidenceGate, SignificanceFloor, DEFAULT_THRESHOLD};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Upper bound for every `*_secs` setting (one year).
pub const MAX_SECS: u64 = 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound on each source, classifier and publisher call.
    #[serde(default = "default_call_secs")]
    pub call_secs: u64,
    /// How long `stop` waits for in-flight job bodies.
    #[serde(default = "default_stop_secs")]
    pub stop_secs: u64,
}

fn default_call_secs() -> u64 {
    30
}

fn default_stop_secs() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_secs: default_call_secs(),
            stop_secs: default_stop_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// ClassifierConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifierConfig {
    /// Offline keyword matching, used for test mode and fixtures.
    Keyword {
        #[serde(default = "default_keywords")]
        keywords: Vec<String>,
        #[serde(default = "default_min_hits")]
        min_hits: usize,
        #[serde(default = "default_label")]
        label: String,
    },
    /// A Messages-style LLM endpoint that answers with a JSON verdict.
    Http {
        endpoint: String,
        model: String,
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
        #[serde(default = "default_label")]
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
    },
}

fn default_keywords() -> Vec<String> {
    [
        "injury",
        "injured",
        "hurt",
        "sprain",
        "strain",
        "tear",
        "torn",
        "surgery",
        "MRI",
        "out",
        "miss",
        "questionable",
        "doubtful",
        "ruled out",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_min_hits() -> usize {
    2
}

fn default_label() -> String {
    "injury".to_string()
}

fn default_api_key_env() -> String {
    "WATCHPOST_API_KEY".to_string()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig::Keyword {
            keywords: default_keywords(),
            min_hits: default_min_hits(),
            label: default_label(),
        }
    }
}

// ---------------------------------------------------------------------------
// PublisherConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublisherConfig {
    /// Append one JSON line per publication to a local outbox file.
    Jsonl {
        #[serde(default = "default_outbox")]
        path: PathBuf,
    },
    /// POST each publication as JSON to a URL.
    Webhook {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_env: Option<String>,
    },
}

fn default_outbox() -> PathBuf {
    PathBuf::from(paths::OUTBOX_FILE)
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig::Jsonl {
            path: default_outbox(),
        }
    }
}

// ---------------------------------------------------------------------------
// Feeds (append-only sources)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedSourceConfig {
    /// JSON array of events, oldest first.
    File { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Job name; also the ledger kind for this feed's events.
    pub name: String,
    /// Cooldown/grouping scope, typically the monitored account. Defaults to
    /// the job name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_feed_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Only classifications with this label act; defaults to the
    /// classifier's own label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub source: FeedSourceConfig,
}

fn default_feed_interval() -> u64 {
    300
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl FeedConfig {
    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(&self.name)
    }

    pub fn gate(&self) -> ConfidenceGate {
        ConfidenceGate {
            label: self.label.clone(),
            threshold: self.threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Entities (mutable sources)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntitySourceConfig {
    /// One `<entity_id>.json` file per active entity.
    Directory { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldRule {
    #[serde(default = "default_weight")]
    pub gain: f64,
    #[serde(default = "default_weight")]
    pub loss: f64,
    /// Overrides the entity-wide `min_significance` for this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_significance: Option<f64>,
}

fn default_weight() -> f64 {
    1.0
}

impl Default for FieldRule {
    fn default() -> Self {
        Self {
            gain: default_weight(),
            loss: default_weight(),
            min_significance: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityConfig {
    /// Job name; also the ledger kind for this job's actions.
    pub name: String,
    #[serde(default = "default_entity_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// How long a terminal entity's snapshot is kept before purging.
    #[serde(default = "default_purge_grace")]
    pub purge_grace_secs: u64,
    #[serde(default)]
    pub min_significance: f64,
    /// Tracked fields. Empty tracks every field at weight 1.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldRule>,
    pub source: EntitySourceConfig,
}

fn default_entity_interval() -> u64 {
    180
}

fn default_cooldown() -> u64 {
    300
}

fn default_purge_grace() -> u64 {
    3600
}

impl EntityConfig {
    pub fn weights(&self) -> FieldWeights {
        let mut weights = FieldWeights::new();
        for (field, rule) in &self.fields {
            weights.insert(
                field.clone(),
                FieldWeight {
                    gain: rule.gain,
                    loss: rule.loss,
                },
            );
        }
        weights
    }

    pub fn floor(&self) -> SignificanceFloor {
        let mut floor = SignificanceFloor::uniform(self.min_significance);
        for (field, rule) in &self.fields {
            if let Some(min) = rule.min_significance {
                floor = floor.with(field.clone(), min);
            }
        }
        floor
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_store")]
    pub store: PathBuf,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<FeedConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityConfig>,
}

fn default_version() -> u32 {
    1
}

fn default_store() -> PathBuf {
    PathBuf::from(paths::STORE_FILE)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            store: default_store(),
            timeouts: TimeoutConfig::default(),
            classifier: ClassifierConfig::default(),
            publisher: PublisherConfig::default(),
            feeds: Vec::new(),
            entities: Vec::new(),
        }
    }
}

impl Config {
    /// Config written by `watchpost init`: one feed and one entity job, both
    /// reading the fixtures that `init` lays down.
    pub fn starter() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            "points".to_string(),
            FieldRule {
                min_significance: Some(4.0),
                ..FieldRule::default()
            },
        );
        fields.insert("rebounds".to_string(), FieldRule::default());
        fields.insert("assists".to_string(), FieldRule::default());
        fields.insert(
            "turnovers".to_string(),
            FieldRule {
                gain: 0.5,
                ..FieldRule::default()
            },
        );

        Self {
            feeds: vec![FeedConfig {
                name: "injury-watch".to_string(),
                scope: Some("shams".to_string()),
                interval_secs: default_feed_interval(),
                threshold: default_threshold(),
                label: None,
                source: FeedSourceConfig::File {
                    path: PathBuf::from(paths::FIXTURES_DIR).join("feed.json"),
                },
            }],
            entities: vec![EntityConfig {
                name: "heat-live".to_string(),
                interval_secs: default_entity_interval(),
                cooldown_secs: default_cooldown(),
                purge_grace_secs: default_purge_grace(),
                min_significance: 2.0,
                fields,
                source: EntitySourceConfig::Directory {
                    path: PathBuf::from(paths::FIXTURES_DIR).join("games"),
                },
            }],
            ..Self::default()
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(WatchpostError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        serde_yaml::from_str(&data)
            .map_err(|e| WatchpostError::Config(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn store_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.store)
    }

    /// All job names, feeds first, in configuration order.
    pub fn job_names(&self) -> Vec<&str> {
        self.feeds
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.entities.iter().map(|e| e.name.as_str()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.feeds.is_empty() && self.entities.is_empty() {
            warnings.push(ConfigWarning::error("no feeds or entities configured"));
        }

        let mut seen = HashSet::new();
        for name in self.job_names() {
            if paths::validate_name(name).is_err() {
                warnings.push(ConfigWarning::error(format!(
                    "invalid job name '{name}': use lowercase letters, digits and hyphens"
                )));
            }
            if !seen.insert(name) {
                warnings.push(ConfigWarning::error(format!("duplicate job name '{name}'")));
            }
        }

        if self.timeouts.call_secs == 0 {
            warnings.push(ConfigWarning::error("timeouts.call_secs must be positive"));
        }
        let mut durations = vec![
            ("timeouts.call_secs".to_string(), self.timeouts.call_secs),
            ("timeouts.stop_secs".to_string(), self.timeouts.stop_secs),
        ];
        for feed in &self.feeds {
            durations.push((format!("feed '{}': interval_secs", feed.name), feed.interval_secs));
        }
        for entity in &self.entities {
            let name = &entity.name;
            durations.push((format!("entity '{name}': interval_secs"), entity.interval_secs));
            durations.push((format!("entity '{name}': cooldown_secs"), entity.cooldown_secs));
            durations.push((
                format!("entity '{name}': purge_grace_secs"),
                entity.purge_grace_secs,
            ));
        }
        for (what, secs) in durations {
            if secs > MAX_SECS {
                warnings.push(ConfigWarning::error(format!(
                    "{what} ({secs}) exceeds the maximum of {MAX_SECS}"
                )));
            }
        }

        for feed in &self.feeds {
            if feed.interval_secs == 0 {
                warnings.push(ConfigWarning::error(format!(
                    "feed '{}': interval_secs must be positive",
                    feed.name
                )));
            }
            if !(0.0..=1.0).contains(&feed.threshold) {
                warnings.push(ConfigWarning::error(format!(
                    "feed '{}': threshold {} is outside [0, 1]",
                    feed.name, feed.threshold
                )));
            }
        }

        for entity in &self.entities {
            if entity.interval_secs == 0 {
                warnings.push(ConfigWarning::error(format!(
                    "entity '{}': interval_secs must be positive",
                    entity.name
                )));
            }
            if entity.cooldown_secs < entity.interval_secs {
                warnings.push(ConfigWarning::warning(format!(
                    "entity '{}': cooldown_secs ({}) is shorter than interval_secs ({}); \
                     every qualifying poll may publish",
                    entity.name, entity.cooldown_secs, entity.interval_secs
                )));
            }
        }

        match &self.classifier {
            ClassifierConfig::Keyword { keywords, .. } if keywords.is_empty() => {
                warnings.push(ConfigWarning::warning(
                    "keyword classifier has no keywords; nothing will ever act",
                ));
            }
            ClassifierConfig::Http { api_key_env, .. }
                if !self.feeds.is_empty() && std::env::var_os(api_key_env).is_none() =>
            {
                warnings.push(ConfigWarning::warning(format!(
                    "http classifier: environment variable {api_key_env} is not set"
                )));
            }
            _ => {}
        }

        if let PublisherConfig::Webhook {
            token_env: Some(var),
            ..
        } = &self.publisher
        {
            if std::env::var_os(var).is_none() {
                warnings.push(ConfigWarning::warning(format!(
                    "webhook publisher: environment variable {var} is not set"
                )));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
