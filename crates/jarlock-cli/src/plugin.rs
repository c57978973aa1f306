//! Plugin descriptor (`plugin.yml`).

use serde::Deserialize;

use crate::container::{ContainerError, Package};

/// Descriptor locations, in lookup order.
pub const DESCRIPTOR_PATHS: [&str; 2] = ["plugin.yml", "paper-plugin.yml"];

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("no plugin.yml or paper-plugin.yml in the package")]
    MissingDescriptor,

    #[error("{path} is not a valid plugin descriptor: {source}")]
    Invalid {
        path: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Container(#[from] ContainerError),
}

#[derive(Debug, Deserialize)]
struct Raw {
    name: String,
    #[serde(default)]
    version: Option<serde_yaml::Value>,
    main: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    commands: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Entry in the package the descriptor was read from.
    pub path: &'static str,
    pub name: String,
    pub version: Option<String>,
    /// Main class in dotted form, as written.
    pub main: String,
    pub description: Option<String>,
    /// Command ids in declaration order.
    pub commands: Vec<String>,
}

impl PluginDescriptor {
    pub fn parse(path: &'static str, text: &str) -> Result<Self, DescriptorError> {
        let raw: Raw =
            serde_yaml::from_str(text).map_err(|source| DescriptorError::Invalid { path, source })?;
        let version = raw.version.and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let commands = raw
            .commands
            .map(|m| {
                m.keys()
                    .filter_map(|k| match k {
                        serde_yaml::Value::String(s) => Some(s.clone()),
                        serde_yaml::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            path,
            name: raw.name,
            version,
            main: raw.main.trim().to_string(),
            description: raw.description,
            commands,
        })
    }

    /// Read `plugin.yml`, falling back to `paper-plugin.yml`.
    pub fn from_package(package: &mut Package) -> Result<Self, DescriptorError> {
        for path in DESCRIPTOR_PATHS {
            if package.contains(path) {
                let bytes = package.read(path)?;
                return Self::parse(path, &String::from_utf8_lossy(&bytes));
            }
        }
        Err(DescriptorError::MissingDescriptor)
    }

    /// Main class as an internal name (`com/example/Main`).
    pub fn main_internal_name(&self) -> String {
        self.main.replace('.', "/")
    }
}
