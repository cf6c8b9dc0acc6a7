//! Distribution definitions

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Repository ecosystem of a distribution
///
/// Parsed from the `type` field; anything other than `apt` or `yum` is
/// rejected while the configuration is loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RepoType {
    Apt,
    Yum,
}

impl RepoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::Apt => "apt",
            RepoType::Yum => "yum",
        }
    }

    /// Parse a repository type name (case-insensitive)
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "apt" => Ok(RepoType::Apt),
            "yum" | "dnf" => Ok(RepoType::Yum),
            _ => Err(ConfigError::UnknownRepoType(value.to_string())),
        }
    }
}

impl TryFrom<String> for RepoType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RepoType::parse(&value)
    }
}

impl From<RepoType> for String {
    fn from(value: RepoType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RepoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proxy settings handed to the mirroring tools
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub http: Option<String>,
    #[serde(default)]
    pub https: Option<String>,
    #[serde(default)]
    pub no_proxy: Option<String>,
}

impl ProxySettings {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none() && self.no_proxy.is_none()
    }

    /// Environment variables for the sync container
    ///
    /// Both spellings are set since the tools disagree on which one they read.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = Vec::new();
        let pairs = [
            ("http_proxy", &self.http),
            ("https_proxy", &self.https),
            ("no_proxy", &self.no_proxy),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                vars.push((key.to_string(), value.clone()));
                vars.push((key.to_ascii_uppercase(), value.clone()));
            }
        }
        vars
    }
}

/// One distribution to mirror
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Filled from the map key when omitted in the file
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub repo_type: RepoType,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub versions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub mirror_urls: Vec<String>,
    /// APT only
    #[serde(default, deserialize_with = "null_as_empty")]
    pub components: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub architectures: Vec<String>,
    /// APT only: also mirror `deb-src`
    #[serde(default)]
    pub include_source_packages: bool,
    /// Overrides the global proxy
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DistributionConfig {
    /// An enabled distribution with no versions, mirrors or architectures yet
    pub fn new(name: impl Into<String>, repo_type: RepoType) -> Self {
        Self {
            name: name.into(),
            repo_type,
            versions: Vec::new(),
            mirror_urls: Vec::new(),
            components: Vec::new(),
            architectures: Vec::new(),
            include_source_packages: false,
            proxy: None,
            enabled: true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
