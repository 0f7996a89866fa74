use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External CI/pipeline state as reported by the git host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildState {
    Pending,
    Success,
    Failure,
    Stopped,
    Unknown(String),
}

impl BuildState {
    /// Parses the host's wire value. Unrecognised states are kept verbatim.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "INPROGRESS" => Self::Pending,
            "SUCCESSFUL" => Self::Success,
            "FAILED" => Self::Failure,
            "STOPPED" => Self::Stopped,
            _ => Self::Unknown(raw.trim().to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Pending => "INPROGRESS",
            Self::Success => "SUCCESSFUL",
            Self::Failure => "FAILED",
            Self::Stopped => "STOPPED",
            Self::Unknown(raw) => raw,
        }
    }
}

/// Latest build result for one commit. Last write wins by arrival.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildStatusRecord {
    pub repository: String,
    pub commit_hash: String,
    pub state: BuildState,
    pub name: String,
    pub url: Option<String>,
    pub updated_at: DateTime<Utc>,
}
