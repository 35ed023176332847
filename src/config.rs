//! Analysis unit configuration.
//!
//! One json object, keyed by unit name:
//!
//! ```json
//! {"loop": {
//!     "file_taint": "loop.taint.json",
//!     "path_s": ["drivers/block/"],
//!     "function": {"loop_fops": {"unlocked_ioctl": {"name": "lo_ioctl"}}}
//! }}
//! ```
//!
//! `file_taint` is the static result of the unit, relative paths are resolved
//! against the directory of the config file. `path_s` lists the source paths the
//! unit covers. `function` maps an operations table and one of its members to
//! the function implementing it.
use std::{
    fs::read_to_string,
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] json::Error),
    #[error("unit '{0}': {1}")]
    Malformed(String, String),
}

/// A function registered as a member of an operations table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Name of the table, e.g. `loop_fops`.
    pub group: String,
    /// Member of the table, e.g. `unlocked_ioctl`.
    pub kind: String,
    pub function: String,
}

#[derive(Debug, Clone)]
pub struct UnitConfig {
    pub name: String,
    pub static_result: PathBuf,
    pub prefixes: Vec<String>,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, Default)]
pub struct DraConfig {
    pub units: Vec<UnitConfig>,
}

impl DraConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut conf = Self::parse(&read_to_string(path)?)?;
        if let Some(dir) = path.parent() {
            for unit in conf.units.iter_mut() {
                if unit.static_result.is_relative() {
                    unit.static_result = dir.join(&unit.static_result);
                }
            }
        }
        Ok(conf)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let root = json::parse(content)?;
        let mut units = Vec::new();
        for (name, val) in root.entries() {
            let static_result = val["file_taint"].as_str().ok_or_else(|| {
                ConfigError::Malformed(name.to_string(), "missing 'file_taint'".into())
            })?;
            let prefixes: Vec<String> = val["path_s"]
                .members()
                .filter_map(|p| p.as_str())
                .map(String::from)
                .collect();
            if prefixes.is_empty() {
                // never selected, every branch of it stays unresolved.
                log::warn!("unit '{}' has no source path", name);
            }

            let mut operations = Vec::new();
            for (group, kinds) in val["function"].entries() {
                for (kind, f) in kinds.entries() {
                    match f["name"].as_str() {
                        Some(function) => operations.push(Operation {
                            group: group.to_string(),
                            kind: kind.to_string(),
                            function: function.to_string(),
                        }),
                        None => log::warn!("unit '{}': {}.{} without name", name, group, kind),
                    }
                }
            }

            units.push(UnitConfig {
                name: name.to_string(),
                static_result: PathBuf::from(static_result),
                prefixes,
                operations,
            });
        }
        Ok(Self { units })
    }

    /// Operations table entry implemented by `function`, if any.
    pub fn operation_of(&self, function: &str) -> Option<&Operation> {
        self.units
            .iter()
            .flat_map(|u| u.operations.iter())
            .find(|op| op.function == function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = r#"{
        "loop": {
            "file_taint": "loop.taint.json",
            "path_s": ["drivers/block/"],
            "function": {
                "loop_fops": {
                    "unlocked_ioctl": {"name": "lo_ioctl"},
                    "open": {"name": "lo_open"}
                }
            }
        },
        "tty": {"file_taint": "/abs/tty.json", "path_s": ["drivers/tty/", "drivers/tty/vt/"]}
    }"#;

    #[test]
    fn parse_units() {
        let conf = DraConfig::parse(CONF).unwrap();
        assert_eq!(conf.units.len(), 2);
        assert_eq!(conf.units[0].name, "loop");
        assert_eq!(conf.units[1].prefixes.len(), 2);
        assert!(conf.units[1].operations.is_empty());

        let op = conf.operation_of("lo_ioctl").unwrap();
        assert_eq!(op.group, "loop_fops");
        assert_eq!(op.kind, "unlocked_ioctl");
        assert!(conf.operation_of("lo_release").is_none());
    }

    #[test]
    fn relative_result_path() {
        let dir = std::env::temp_dir().join(format!("dra-conf-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("conf.json");
        std::fs::write(&path, CONF).unwrap();
        let conf = DraConfig::load(&path).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(conf.units[0].static_result, dir.join("loop.taint.json"));
        assert_eq!(conf.units[1].static_result, PathBuf::from("/abs/tty.json"));
    }

    #[test]
    fn unit_without_result() {
        let ret = DraConfig::parse(r#"{"loop": {"path_s": ["drivers/block/"]}}"#);
        assert!(matches!(ret, Err(ConfigError::Malformed(_, _))));
    }
}
