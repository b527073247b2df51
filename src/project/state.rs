//! Project lifecycle state machine
//!
//! `Scaffolded -> Validated -> Deployed`, persisted as JSON in the project
//! directory. A deploy is only legal from `Validated`, and a deployed project
//! has to be validated again before the next deploy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// State file name inside a project directory
pub const STATE_FILE_NAME: &str = ".appforge_state";

/// Payload of a successful validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedData {
    pub validated_at: DateTime<Utc>,
    pub checksum: String,
}

/// Payload of a successful deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedData {
    pub validated_at: DateTime<Utc>,
    pub checksum: String,
    pub deployed_at: DateTime<Utc>,
}

/// Lifecycle stage without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Scaffolded,
    Validated,
    Deployed,
}

impl StateKind {
    fn as_str(&self) -> &'static str {
        match self {
            StateKind::Scaffolded => "scaffolded",
            StateKind::Validated => "validated",
            StateKind::Deployed => "deployed",
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted lifecycle record of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectState {
    Scaffolded,
    Validated(ValidatedData),
    Deployed(DeployedData),
}

/// On-disk envelope; the payload stays untyped until the stage is known
#[derive(Serialize, Deserialize)]
struct RawState {
    state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl ProjectState {
    /// Stage of this record
    pub fn kind(&self) -> StateKind {
        match self {
            ProjectState::Scaffolded => StateKind::Scaffolded,
            ProjectState::Validated(_) => StateKind::Validated,
            ProjectState::Deployed(_) => StateKind::Deployed,
        }
    }

    /// Whether moving from this stage to `next` is legal
    pub fn can_transition_to(&self, next: StateKind) -> bool {
        matches!(
            (self.kind(), next),
            (StateKind::Scaffolded, StateKind::Validated)
                | (StateKind::Validated, StateKind::Validated)
                | (StateKind::Validated, StateKind::Deployed)
                | (StateKind::Deployed, StateKind::Validated)
        )
    }

    /// Record a successful validation of content with `checksum`.
    ///
    /// Callers invoke this only after the validation run passed.
    pub fn validate(&self, checksum: impl Into<String>) -> ProjectState {
        ProjectState::Validated(ValidatedData {
            validated_at: Utc::now(),
            checksum: checksum.into(),
        })
    }

    /// Record a successful deployment of the validated content
    pub fn deploy(&self) -> Result<ProjectState> {
        match self {
            ProjectState::Validated(data) => Ok(ProjectState::Deployed(DeployedData {
                validated_at: data.validated_at,
                checksum: data.checksum.clone(),
                deployed_at: Utc::now(),
            })),
            ProjectState::Scaffolded => Err(self.illegal(StateKind::Deployed, "not validated yet")),
            ProjectState::Deployed(_) => Err(self.illegal(
                StateKind::Deployed,
                "already deployed, re-validate first",
            )),
        }
    }

    fn illegal(&self, to: StateKind, reason: &str) -> Error {
        Error::InvalidTransition {
            from: self.kind().to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Checksum of the validated content, if any
    pub fn checksum(&self) -> Option<&str> {
        match self {
            ProjectState::Scaffolded => None,
            ProjectState::Validated(data) => Some(&data.checksum),
            ProjectState::Deployed(data) => Some(&data.checksum),
        }
    }

    /// When the content was last validated
    pub fn validated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ProjectState::Scaffolded => None,
            ProjectState::Validated(data) => Some(data.validated_at),
            ProjectState::Deployed(data) => Some(data.validated_at),
        }
    }

    /// Path of the state file for `project_dir`
    pub fn path(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_FILE_NAME)
    }

    /// Load the state, treating a missing file as `Scaffolded`
    pub fn load(project_dir: &Path) -> Result<ProjectState> {
        Ok(Self::load_existing(project_dir)?.unwrap_or(ProjectState::Scaffolded))
    }

    /// Load the state file if one exists
    pub fn load_existing(project_dir: &Path) -> Result<Option<ProjectState>> {
        let path = Self::path(project_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        Self::from_json(&content).map(Some)
    }

    /// Persist atomically: write a sibling temp file, then rename over the
    /// state file.
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let json = self.to_json()?;

        let mut tmp = tempfile::NamedTempFile::new_in(project_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(Self::path(project_dir))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Serialize to the on-disk JSON document
    pub fn to_json(&self) -> Result<String> {
        let data = match self {
            ProjectState::Scaffolded => None,
            ProjectState::Validated(data) => Some(serde_json::to_value(data)?),
            ProjectState::Deployed(data) => Some(serde_json::to_value(data)?),
        };
        let raw = RawState {
            state: self.kind().to_string(),
            data,
        };
        Ok(serde_json::to_string_pretty(&raw)?)
    }

    /// Decode the on-disk JSON document
    pub fn from_json(content: &str) -> Result<ProjectState> {
        let raw: RawState = serde_json::from_str(content)
            .map_err(|e| Error::StateCorrupt(format!("invalid state document: {}", e)))?;

        match raw.state.to_lowercase().as_str() {
            "scaffolded" => Ok(ProjectState::Scaffolded),
            "validated" => {
                let data = payload(raw.data, StateKind::Validated)?;
                Ok(ProjectState::Validated(ValidatedData {
                    validated_at: timestamp_field(&data, "validated_at")?,
                    checksum: string_field(&data, "checksum")?,
                }))
            }
            "deployed" => {
                let data = payload(raw.data, StateKind::Deployed)?;
                Ok(ProjectState::Deployed(DeployedData {
                    validated_at: timestamp_field(&data, "validated_at")?,
                    checksum: string_field(&data, "checksum")?,
                    deployed_at: timestamp_field(&data, "deployed_at")?,
                }))
            }
            other => Err(Error::StateCorrupt(format!("unknown state '{}'", other))),
        }
    }
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectState::Scaffolded => write!(f, "scaffolded"),
            ProjectState::Validated(data) => write!(
                f,
                "validated at {} (checksum {})",
                data.validated_at.to_rfc3339(),
                data.checksum
            ),
            ProjectState::Deployed(data) => write!(
                f,
                "deployed at {} (validated at {}, checksum {})",
                data.deployed_at.to_rfc3339(),
                data.validated_at.to_rfc3339(),
                data.checksum
            ),
        }
    }
}

fn payload(data: Option<Value>, kind: StateKind) -> Result<Map<String, Value>> {
    match data {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(Error::StateCorrupt(format!(
            "{} payload must be an object, found {}",
            kind, other
        ))),
        None => Err(Error::StateCorrupt(format!("{} state has no payload", kind))),
    }
}

fn string_field(data: &Map<String, Value>, name: &str) -> Result<String> {
    match data.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(Error::StateCorrupt(format!("field '{}' is empty", name))),
        Some(_) => Err(Error::StateCorrupt(format!("field '{}' is not a string", name))),
        None => Err(Error::StateCorrupt(format!("missing field '{}'", name))),
    }
}

fn timestamp_field(data: &Map<String, Value>, name: &str) -> Result<DateTime<Utc>> {
    let raw = string_field(data, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::StateCorrupt(format!("field '{}' is not a timestamp: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn validated(checksum: &str) -> ProjectState {
        ProjectState::Scaffolded.validate(checksum)
    }

    #[test]
    fn test_transition_table() {
        use StateKind::*;
        let deployed = validated("abc").deploy().unwrap();
        let cases = [
            (ProjectState::Scaffolded, [false, true, false]),
            (validated("abc"), [false, true, true]),
            (deployed, [false, true, false]),
        ];
        for (state, expected) in cases {
            for (next, allowed) in [Scaffolded, Validated, Deployed].into_iter().zip(expected) {
                assert_eq!(
                    state.can_transition_to(next),
                    allowed,
                    "{} -> {}",
                    state.kind(),
                    next
                );
            }
        }
    }

    #[test]
    fn test_deploy_from_scaffolded_fails() {
        let err = ProjectState::Scaffolded.deploy().unwrap_err();
        assert!(err.to_string().contains("not validated"));
        assert!(err.is_state_error());
    }

    #[test]
    fn test_deploy_from_deployed_fails() {
        let deployed = validated("abc").deploy().unwrap();
        let err = deployed.deploy().unwrap_err();
        assert!(err.to_string().contains("already deployed"));
    }

    #[test]
    fn test_deploy_carries_validation_record() {
        let state = validated("abc");
        let ProjectState::Validated(source) = &state else {
            panic!("expected validated state");
        };

        match state.deploy().unwrap() {
            ProjectState::Deployed(data) => {
                assert_eq!(data.checksum, source.checksum);
                assert_eq!(data.validated_at, source.validated_at);
                assert!(data.deployed_at >= source.validated_at);
            }
            other => panic!("expected deployed state, got {:?}", other),
        }
    }

    #[test]
    fn test_checksum_accessor() {
        assert_eq!(ProjectState::Scaffolded.checksum(), None);
        assert_eq!(validated("abc").checksum(), Some("abc"));
        assert_eq!(validated("abc").deploy().unwrap().checksum(), Some("abc"));
    }

    #[test]
    fn test_missing_file_is_scaffolded() {
        let dir = tempdir().unwrap();
        assert!(ProjectState::load_existing(dir.path()).unwrap().is_none());
        assert_eq!(ProjectState::load(dir.path()).unwrap(), ProjectState::Scaffolded);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        for state in [
            ProjectState::Scaffolded,
            validated("abc"),
            validated("def").deploy().unwrap(),
        ] {
            state.save(dir.path()).unwrap();
            assert_eq!(ProjectState::load(dir.path()).unwrap(), state);
        }

        // Only the state file remains; no temp files left behind
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_document_shape() {
        let json = validated("abc").to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["state"], "validated");
        assert_eq!(value["data"]["checksum"], "abc");
        assert!(value["data"]["validated_at"].is_string());
    }

    #[test]
    fn test_corrupt_documents() {
        let cases = [
            "not json",
            r#"{"state": "validated"}"#,
            r#"{"state": "validated", "data": [1, 2]}"#,
            r#"{"state": "validated", "data": {"checksum": "abc"}}"#,
            r#"{"state": "validated", "data": {"checksum": 42, "validated_at": "2024-01-01T00:00:00Z"}}"#,
            r#"{"state": "deployed", "data": {"checksum": "abc", "validated_at": "2024-01-01T00:00:00Z", "deployed_at": "yesterday"}}"#,
            r#"{"state": "published"}"#,
        ];
        for case in cases {
            let err = ProjectState::from_json(case).unwrap_err();
            assert!(matches!(err, Error::StateCorrupt(_)), "{}: {}", case, err);
        }
    }

    #[test]
    fn test_corrupt_file_on_disk() {
        let dir = tempdir().unwrap();
        std::fs::write(ProjectState::path(dir.path()), "{").unwrap();
        let err = ProjectState::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::StateCorrupt(_)));
    }
}
