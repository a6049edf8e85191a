//! Supported ML frameworks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// The framework a model was produced with. Drives adapter and serializer dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Sklearn,
    Tensorflow,
    Pytorch,
    #[default]
    Unknown,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sklearn => "sklearn",
            Self::Tensorflow => "tensorflow",
            Self::Pytorch => "pytorch",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Guess the framework of a model file from its extension.
    ///
    /// Directories are never guessed: a SavedModel directory is only accepted
    /// with an explicit framework.
    pub fn sniff_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("pkl") => Self::Sklearn,
            Some("pt" | "pth") => Self::Pytorch,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sklearn" => Ok(Self::Sklearn),
            "tensorflow" => Ok(Self::Tensorflow),
            "pytorch" => Ok(Self::Pytorch),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ConfigError::UnknownFramework { name: s.to_string() }),
        }
    }
}
