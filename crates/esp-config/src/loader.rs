//! YAML loader with tag support
//!
//! Two custom tags are understood:
//! - `!include path` - replaced by the parsed content of another YAML file,
//!   resolved relative to the including file
//! - `!env_var NAME [default]` - replaced by an environment variable

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader resolving `!include` and `!env_var`
pub struct YamlLoader {
    /// Base directory for relative top-level paths
    base_dir: PathBuf,
    /// Files currently being loaded, for cycle detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            include_stack: HashSet::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Load a YAML file and resolve its tags
    ///
    /// An empty document loads as an empty mapping.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Parse YAML text; `source_path` anchors relative includes
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        match self.process_value(value, source_path)? {
            Value::Null => Ok(Value::Mapping(Mapping::new())),
            value => Ok(value),
        }
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    let v = self.process_value(v, source_path)?;
                    result.insert(k, v);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process_value(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            _ => Ok(value),
        }
    }

    fn process_tagged(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Processing tag '{}' with value {:?}", tag, tagged.value);

        match tag.as_str() {
            "!include" => {
                let include_path = include_path(&tagged.value, source_path)?;
                if !include_path.exists() {
                    return Err(ConfigError::IncludeNotFound { path: include_path });
                }
                debug!("Including file: {:?}", include_path);
                self.load_file(&include_path)
            }
            "!env_var" => env_var(&tagged.value),
            // Unknown tags are left for the deserializer to reject
            _ => {
                let value = self.process_value(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

fn include_path(value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
    let Value::String(raw) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!include".to_string(),
            reason: "path must be a string".to_string(),
        });
    };

    let path = Path::new(raw);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let base = source_path.parent().unwrap_or_else(|| Path::new("."));
    Ok(base.join(path))
}

/// `!env_var NAME` or `!env_var NAME fallback`
fn env_var(value: &Value) -> ConfigResult<Value> {
    let Value::String(raw) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };

    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let fallback = parts.next().map(str::trim);

    match (std::env::var(name), fallback) {
        (Ok(v), _) => {
            debug!("Substituted env var: {}", name);
            Ok(Value::String(v))
        }
        (Err(_), Some(fallback)) => {
            debug!("Env var {} not set, using fallback", name);
            // The fallback is parsed so `!env_var PORT 1883` yields a number
            Ok(serde_yaml::from_str(fallback).unwrap_or_else(|_| Value::String(fallback.into())))
        }
        (Err(_), None) => Err(ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// Load a YAML file relative to `base_dir` with tag processing
pub fn load_yaml(base_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(base_dir).load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "config.yaml", "actions: !include parts/actions.yaml\n");
        write_file(dir.path(), "parts/actions.yaml", "actions: !include more.yaml\n");
        write_file(dir.path(), "parts/more.yaml", "- id: a\n");

        let value = load_yaml(dir.path(), "config.yaml").unwrap();
        assert_eq!(value["actions"]["actions"][0]["id"], Value::from("a"));
    }

    #[test]
    fn test_missing_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "config.yaml", "screens: !include nope.yaml\n");

        let err = load_yaml(dir.path(), "config.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IncludeNotFound { .. }));
    }

    #[test]
    fn test_circular_include() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write_file(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let err = load_yaml(dir.path(), "a.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::CircularInclude { .. }));
    }

    #[test]
    fn test_env_var() {
        std::env::set_var("ESPDISPLAY_LOADER_TEST_ENTITY", "ha:sensor.kitchen");
        let mut loader = YamlLoader::new(".");
        let value = loader
            .load_string(
                "bind: !env_var ESPDISPLAY_LOADER_TEST_ENTITY\nport: !env_var ESPDISPLAY_LOADER_UNSET 1883\n",
                Path::new("inline.yaml"),
            )
            .unwrap();

        assert_eq!(value["bind"], Value::from("ha:sensor.kitchen"));
        assert_eq!(value["port"], Value::from(1883));
    }

    #[test]
    fn test_env_var_missing() {
        let mut loader = YamlLoader::new(".");
        let err = loader
            .load_string("x: !env_var ESPDISPLAY_LOADER_NEVER_SET\n", Path::new("inline.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound { var } if var == "ESPDISPLAY_LOADER_NEVER_SET"));
    }

    #[test]
    fn test_empty_document_is_empty_mapping() {
        let mut loader = YamlLoader::new(".");
        let value = loader.load_string("", Path::new("empty.yaml")).unwrap();
        assert_eq!(value, Value::Mapping(Mapping::new()));
    }
}
