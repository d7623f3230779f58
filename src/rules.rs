//! Document-type rule sets and the directory they live in.
//!
//! A rules directory holds one YAML file per document type, named
//! `<type>.yml` or `<type>.yaml`. Files are read on demand and never
//! written.

use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::options::{ExtractionMethod, PageSelection};
use crate::selectors::SelectorSpec;
use crate::transforms::TransformStep;

const RULE_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// The `selection` section: how to extract and which files the type covers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SelectionSpec {
    pub method: Option<ExtractionMethod>,
    pub pages: Option<PageSelection>,
    pub filename_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    pub name: String,
    pub version: String,
    pub description: String,
    pub selection: SelectionSpec,
    pub extraction: SelectorSpec,
    pub transforms: Vec<TransformStep>,
    /// Passed through untouched for output writers.
    pub output: serde_yaml::Mapping,
}

impl RuleSet {
    /// A rule set with no constraints and no transforms.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0".to_string(),
            description: String::new(),
            selection: SelectionSpec::default(),
            extraction: SelectorSpec::default(),
            transforms: Vec::new(),
            output: serde_yaml::Mapping::new(),
        }
    }

    /// Reads and validates one rule file.
    ///
    /// # Errors
    /// `Read` when the file cannot be opened, `Parse` for anything malformed.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text, path)
    }

    /// Parses rule-file text. `origin` names the file in errors and supplies
    /// the default type name.
    ///
    /// # Errors
    /// `Parse` for empty or non-mapping documents, malformed sections,
    /// invalid regexes, unknown cast types, and malformed expressions.
    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            path: origin.to_path_buf(),
            message,
        };

        let document: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|error| parse_error(error.to_string()))?;
        match document {
            serde_yaml::Value::Null => return Err(parse_error("empty document".to_string())),
            serde_yaml::Value::Mapping(_) => {}
            _ => return Err(parse_error("top level must be a mapping".to_string())),
        }

        let raw: RawRuleFile =
            serde_yaml::from_value(document).map_err(|error| parse_error(error.to_string()))?;

        let mut transforms = Vec::new();
        for (index, step) in raw.transforms.unwrap_or_default().into_iter().enumerate() {
            let step = TransformStep::from_yaml(step)
                .map_err(|message| parse_error(format!("transforms[{index}]: {message}")))?;
            step.validate()
                .map_err(|error| parse_error(format!("transforms[{index}]: {error}")))?;
            transforms.push(step);
        }

        let name = raw.name.filter(|name| !name.trim().is_empty()).unwrap_or_else(|| {
            origin
                .file_stem()
                .map_or_else(|| "unknown".to_string(), |stem| stem.to_string_lossy().into_owned())
        });

        Ok(Self {
            name,
            version: raw.version.map_or_else(|| "1.0".to_string(), version_string),
            description: raw.description.unwrap_or_default(),
            selection: raw.selection.unwrap_or_default(),
            extraction: raw.extraction.unwrap_or_default(),
            transforms,
            output: raw.output.unwrap_or_default(),
        })
    }

    fn matches_filename(&self, file_name: &str) -> bool {
        self.selection.filename_patterns.iter().any(|raw| match Pattern::new(raw) {
            Ok(pattern) => pattern.matches(file_name),
            Err(error) => {
                warn!(rule = %self.name, pattern = %raw, %error, "invalid filename pattern");
                false
            }
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRuleFile {
    name: Option<String>,
    version: Option<serde_yaml::Value>,
    description: Option<String>,
    selection: Option<SelectionSpec>,
    extraction: Option<SelectorSpec>,
    transforms: Option<Vec<serde_yaml::Value>>,
    output: Option<serde_yaml::Mapping>,
}

fn version_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(text) => text,
        serde_yaml::Value::Number(number) => number.to_string(),
        serde_yaml::Value::Bool(flag) => flag.to_string(),
        _ => "1.0".to_string(),
    }
}

/// Resolves document-type names to rule sets.
#[derive(Debug, Clone, Default)]
pub struct RulesRegistry {
    rules_dir: Option<PathBuf>,
}

impl RulesRegistry {
    #[must_use]
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: Some(rules_dir.into()),
        }
    }

    /// A registry that can only load explicit override paths.
    #[must_use]
    pub fn without_dir() -> Self {
        Self::default()
    }

    /// Loads `<name>.yml`, falling back to `<name>.yaml`. An `override_path`
    /// is read instead of looking the name up.
    ///
    /// # Errors
    /// `RulesDirNotConfigured`, `NotFound`, `Read` or `Parse`.
    pub fn load_type(
        &self,
        name: &str,
        override_path: Option<&Path>,
    ) -> Result<RuleSet, ConfigError> {
        if let Some(path) = override_path {
            debug!(path = %path.display(), "loading rules from override path");
            return RuleSet::from_path(path);
        }

        let dir = self
            .rules_dir
            .as_deref()
            .ok_or(ConfigError::RulesDirNotConfigured)?;

        let candidate = RULE_EXTENSIONS
            .iter()
            .map(|extension| dir.join(format!("{name}.{extension}")))
            .find(|path| path.is_file())
            .ok_or_else(|| ConfigError::NotFound {
                name: name.to_string(),
                dir: dir.to_path_buf(),
            })?;

        debug!(path = %candidate.display(), "loading rules");
        RuleSet::from_path(&candidate)
    }

    /// Rule files in the directory, sorted by file name.
    fn rule_files(&self) -> Vec<PathBuf> {
        let Some(dir) = self.rules_dir.as_deref() else {
            return Vec::new();
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                debug!(dir = %dir.display(), %error, "rules directory not readable");
                return Vec::new();
            }
        };

        let mut files = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|extension| extension.to_str())
                        .is_some_and(|extension| RULE_EXTENSIONS.contains(&extension))
            })
            .collect::<Vec<_>>();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        files
    }

    fn parseable_rules(&self) -> impl Iterator<Item = RuleSet> {
        self.rule_files()
            .into_iter()
            .filter_map(|path| match RuleSet::from_path(&path) {
                Ok(rules) => Some(rules),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable rule file");
                    None
                }
            })
    }

    /// First rule set, in file-name order, with a `filename_patterns` glob
    /// matching the document's file name.
    #[must_use]
    pub fn detect_type(&self, document: &Path) -> Option<String> {
        let file_name = document.file_name()?.to_string_lossy();
        let detected = self
            .parseable_rules()
            .find(|rules| rules.matches_filename(&file_name))
            .map(|rules| rules.name);

        match &detected {
            Some(name) => debug!(document = %file_name, rule = %name, "detected document type"),
            None => debug!(document = %file_name, "no rule matched document"),
        }
        detected
    }

    /// Names of every parseable rule file, in file-name order.
    #[must_use]
    pub fn list_types(&self) -> Vec<String> {
        self.parseable_rules().map(|rules| rules.name).collect()
    }
}
