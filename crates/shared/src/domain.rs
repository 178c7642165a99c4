use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_newtype!(SessionId);

/// One piece of code-execution output. `Divider` closes a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputFragment {
    Stdout { text: String },
    Stderr { text: String },
    Divider,
}

impl OutputFragment {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Stdout { text: text.into() }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::Stderr { text: text.into() }
    }

    pub fn is_divider(&self) -> bool {
        matches!(self, Self::Divider)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MerkleDisplayMode {
    #[default]
    Full,
    Diff,
}

impl MerkleDisplayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Diff => "diff",
        }
    }
}

impl FromStr for MerkleDisplayMode {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "full" => Ok(Self::Full),
            "diff" => Ok(Self::Diff),
            other => Err(ValidationError::UnknownDisplayMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Ongoing,
    Finished,
}

impl BackupStatus {
    pub const ONGOING: &'static str = "ongoing";
    pub const FINISHED: &'static str = "finished";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ongoing => Self::ONGOING,
            Self::Finished => Self::FINISHED,
        }
    }
}

impl FromStr for BackupStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            Self::ONGOING => Ok(Self::Ongoing),
            Self::FINISHED => Ok(Self::Finished),
            other => Err(ValidationError::UnknownBackupStatus(other.to_string())),
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
