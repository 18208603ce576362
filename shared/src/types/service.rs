//! Service descriptions and the environment handed to every spawned process

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::StageName;
use crate::errors::{SharedError, SharedResult};

/// Immutable environment shared by every process of one launch
///
/// Cloning is cheap; all clones point at the same map, so no stage can
/// observe another stage's modifications.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment(Arc<BTreeMap<String, String>>);

impl Environment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Merges a base environment with explicit overrides
#[derive(Debug, Clone, Default)]
pub struct EnvironmentBuilder {
    vars: BTreeMap<String, String>,
}

impl EnvironmentBuilder {
    /// Start from an empty environment
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start from the launcher's own environment
    pub fn from_current() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Start from an explicit base mapping
    pub fn from_base<I, K, V>(base: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: base.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Override (or add) one entry
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> SharedResult<Environment> {
        for (key, value) in &self.vars {
            if key.is_empty() || key.contains('=') || key.contains('\0') || value.contains('\0') {
                return Err(SharedError::InvalidEnvironment { key: key.clone() });
            }
        }
        Ok(Environment(Arc::new(self.vars)))
    }
}

/// Immutable description of how to launch one supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    name: String,
    command: Vec<String>,
    cwd: PathBuf,
    env: Environment,
    log_file: PathBuf,
    dependencies: BTreeSet<StageName>,
    readiness_url: Option<String>,
}

impl ServiceSpec {
    pub fn new(
        name: impl Into<String>,
        command: Vec<String>,
        cwd: impl Into<PathBuf>,
        env: Environment,
        log_file: impl Into<PathBuf>,
    ) -> SharedResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SharedError::InvalidService {
                service: name,
                reason: "empty name".to_string(),
            });
        }
        if command.first().map_or(true, |program| program.is_empty()) {
            return Err(SharedError::InvalidService {
                service: name,
                reason: "empty command line".to_string(),
            });
        }

        Ok(Self {
            name,
            command,
            cwd: cwd.into(),
            env,
            log_file: log_file.into(),
            dependencies: BTreeSet::new(),
            readiness_url: None,
        })
    }

    pub fn depends_on<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = StageName>,
    {
        self.dependencies.extend(stages);
        self
    }

    pub fn with_readiness_url(mut self, url: impl Into<String>) -> Self {
        self.readiness_url = Some(url.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program followed by its arguments
    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    pub fn args(&self) -> &[String] {
        &self.command[1..]
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn dependencies(&self) -> &BTreeSet<StageName> {
        &self.dependencies
    }

    pub fn readiness_url(&self) -> Option<&str> {
        self.readiness_url.as_deref()
    }
}
