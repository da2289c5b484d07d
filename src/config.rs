//! The configuration data model and the store that owns the authoritative copy of it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::UsageError;

/// The category every configuration must contain. Categories that are created without explicit
/// settings inherit this category's level and appenders.
pub const DEFAULT_CATEGORY: &str = "default";

/// A logging severity. Ordered from most to least verbose, `All` and `Off` are only meaningful as
/// thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    All,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Mark,
    Off,
}

impl Level {
    /// Every level a message can be emitted at, from most to least verbose.
    pub const EMITTABLE: [Level; 7] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Fatal,
        Level::Mark,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::All => "ALL",
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
            Level::Mark => "MARK",
            Level::Off => "OFF",
        }
    }

    /// Whether a message at this level passes a category configured with `threshold`.
    pub fn enabled_at(self, threshold: Level) -> bool {
        !matches!(self, Level::All | Level::Off) && self >= threshold
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a level name that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        [
            Level::All,
            Level::Trace,
            Level::Debug,
            Level::Info,
            Level::Warn,
            Level::Error,
            Level::Fatal,
            Level::Mark,
            Level::Off,
        ]
        .into_iter()
        .find(|level| level.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| ParseLevelError(s.to_owned()))
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// The settings for a single named category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub level: Level,
    /// Names of entries in [`Configuration::appenders`], in output order.
    pub appenders: Vec<String>,
}

/// The complete logging configuration. Appender descriptors are opaque and passed through to the
/// backend as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub appenders: BTreeMap<String, Value>,
    pub categories: BTreeMap<String, Category>,
    #[serde(default)]
    pub disable_clustering: bool,
    /// Any other top level options, these are only meaningful to the backend.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Configuration {
    /// A single `stdout` appender and a `default` category that has logging turned off.
    fn default() -> Self {
        let mut appenders = BTreeMap::new();
        appenders.insert("out".to_owned(), serde_json::json!({ "type": "stdout" }));

        let mut categories = BTreeMap::new();
        categories.insert(
            DEFAULT_CATEGORY.to_owned(),
            Category {
                level: Level::Off,
                appenders: vec!["out".to_owned()],
            },
        );

        Configuration {
            appenders,
            categories,
            disable_clustering: false,
            extra: Map::new(),
        }
    }
}

/// A partial category used inside of a [`PartialConfiguration`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialCategory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appenders: Option<Vec<String>>,
}

impl PartialCategory {
    pub fn level(level: Level) -> Self {
        PartialCategory {
            level: Some(level),
            appenders: None,
        }
    }

    fn apply_to(&self, category: &mut Category) {
        if let Some(level) = self.level {
            category.level = level;
        }
        // Sequences are replaced, merging them by index would resurrect removed appenders
        if let Some(appenders) = &self.appenders {
            category.appenders = appenders.clone();
        }
    }
}

impl From<Category> for PartialCategory {
    fn from(category: Category) -> Self {
        PartialCategory {
            level: Some(category.level),
            appenders: Some(category.appenders),
        }
    }
}

/// A configuration fragment. Only the fields that are set are merged into the current
/// configuration. This is also the shape persisted configurations are decoded as, so a stored
/// blob only needs to contain the values it wants to override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appenders: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<BTreeMap<String, PartialCategory>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_clustering: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PartialConfiguration {
    /// A fragment that only touches a single category.
    pub fn category(name: impl Into<String>, category: impl Into<PartialCategory>) -> Self {
        PartialConfiguration::default().with_category(name, category)
    }

    pub fn with_category(
        mut self,
        name: impl Into<String>,
        category: impl Into<PartialCategory>,
    ) -> Self {
        self.categories
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), category.into());
        self
    }

    pub fn with_appender(mut self, name: impl Into<String>, descriptor: Value) -> Self {
        self.appenders
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), descriptor);
        self
    }

    /// Whether merging this fragment can never change anything.
    pub fn is_empty(&self) -> bool {
        self.appenders.as_ref().map_or(true, BTreeMap::is_empty)
            && self.categories.as_ref().map_or(true, BTreeMap::is_empty)
            && self.disable_clustering.is_none()
            && self.extra.is_empty()
    }

    /// The category names this fragment sets values for.
    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .flat_map(|categories| categories.keys())
            .map(String::as_str)
    }

    /// Whether this fragment changes any appender descriptor.
    pub fn touches_appenders(&self) -> bool {
        self.appenders
            .as_ref()
            .is_some_and(|appenders| !appenders.is_empty())
    }
}

impl From<Configuration> for PartialConfiguration {
    fn from(config: Configuration) -> Self {
        PartialConfiguration {
            appenders: Some(config.appenders),
            categories: Some(
                config
                    .categories
                    .into_iter()
                    .map(|(name, category)| (name, category.into()))
                    .collect(),
            ),
            disable_clustering: Some(config.disable_clustering),
            extra: config.extra,
        }
    }
}

impl Configuration {
    /// Deep merge a fragment into this configuration. Maps are merged key by key at every depth,
    /// scalars and sequences are overwritten. A newly introduced category starts out as a copy of
    /// the (already merged) `default` category.
    pub fn merge(&mut self, fragment: &PartialConfiguration) {
        if let Some(appenders) = &fragment.appenders {
            for (name, descriptor) in appenders {
                match self.appenders.get_mut(name) {
                    Some(existing) => merge_value(existing, descriptor),
                    None => {
                        self.appenders.insert(name.clone(), descriptor.clone());
                    }
                }
            }
        }

        if let Some(categories) = &fragment.categories {
            if let Some(default) = categories.get(DEFAULT_CATEGORY) {
                let entry = self
                    .categories
                    .entry(DEFAULT_CATEGORY.to_owned())
                    .or_insert_with(|| Category {
                        level: Level::Off,
                        appenders: Vec::new(),
                    });
                default.apply_to(entry);
            }

            for (name, partial) in categories {
                if name == DEFAULT_CATEGORY {
                    continue;
                }

                match self.categories.get_mut(name) {
                    Some(existing) => partial.apply_to(existing),
                    None => {
                        let mut category = self
                            .categories
                            .get(DEFAULT_CATEGORY)
                            .cloned()
                            .unwrap_or(Category {
                                level: Level::Off,
                                appenders: Vec::new(),
                            });
                        partial.apply_to(&mut category);
                        self.categories.insert(name.clone(), category);
                    }
                }
            }
        }

        if let Some(disable_clustering) = fragment.disable_clustering {
            self.disable_clustering = disable_clustering;
        }

        for (key, value) in &fragment.extra {
            match self.extra.get_mut(key) {
                Some(existing) => merge_value(existing, value),
                None => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Returns a copy of this configuration with `fragment` merged in.
    pub fn merged(&self, fragment: &PartialConfiguration) -> Configuration {
        let mut config = self.clone();
        config.merge(fragment);
        config
    }

    /// The `default` category. Every configuration held by a [`ConfigStore`] has one.
    pub fn default_category(&self) -> Option<&Category> {
        self.categories.get(DEFAULT_CATEGORY)
    }
}

/// Recursively merge `source` into `target`. Objects are merged key by key, everything else is
/// overwritten.
fn merge_value(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, source) => *target = source.clone(),
    }
}

/// Owns the authoritative configuration. Reads always hand out deep copies, and writes either go
/// through [`merge()`][Self::merge()] or through a [`preview()`][Self::preview()] followed by a
/// [`commit()`][Self::commit()] once the backend accepted the previewed configuration.
#[derive(Debug)]
pub struct ConfigStore {
    current: Configuration,
}

impl ConfigStore {
    /// Wrap an initial configuration. Fails if it has no `default` category.
    pub fn new(config: Configuration) -> Result<Self, UsageError> {
        if config.default_category().is_none() {
            return Err(UsageError::MissingDefaultCategory);
        }

        Ok(ConfigStore { current: config })
    }

    /// Merge a fragment into the stored configuration and return a copy of the result. Passing
    /// `None` or an empty fragment leaves the store untouched.
    pub fn merge(&mut self, fragment: Option<&PartialConfiguration>) -> Configuration {
        if let Some(fragment) = fragment {
            self.current.merge(fragment);
        }

        self.read()
    }

    /// A deep copy of the current configuration.
    pub fn read(&self) -> Configuration {
        self.current.clone()
    }

    /// The configuration `merge()` would produce, without storing it.
    pub fn preview(&self, fragment: Option<&PartialConfiguration>) -> Configuration {
        match fragment {
            Some(fragment) => self.current.merged(fragment),
            None => self.read(),
        }
    }

    /// Replace the stored configuration with a previewed one.
    pub fn commit(&mut self, config: Configuration) {
        debug_assert!(config.default_category().is_some());
        self.current = config;
    }

    pub(crate) fn get(&self) -> &Configuration {
        &self.current
    }
}
