//! Project records, statistics and live update payloads.
//!
//! These mirror the JSON bodies of the builder API (`/api/v1/projects`,
//! `/api/v1/builder/create`) and the `data` object carried by realtime
//! `project_update` frames.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// ProjectStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a build job: `pending → processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProjectStatus {
    /// Wire representation, as used in query strings and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further status changes are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A build job as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: DbId,
    pub task_id: String,
    pub email: String,
    pub brief: String,
    pub round_num: i32,
    pub status: ProjectStatus,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub pages_url: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// One page of projects plus the total matching the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectList {
    pub total: i64,
    pub projects: Vec<ProjectRecord>,
}

/// Aggregate project counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStats {
    pub total_projects: i64,
    pub completed: i64,
    pub processing: i64,
    pub failed: i64,
    pub pending: i64,
}

/// Paging and status filter for project listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFilter {
    pub skip: u32,
    pub limit: u32,
    pub status: Option<ProjectStatus>,
}

impl Default for ProjectFilter {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 50,
            status: None,
        }
    }
}

impl ProjectFilter {
    /// The `limit` most recent projects, any status.
    pub fn recent(limit: u32) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    /// Query-string pairs for `GET /projects`.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("skip", self.skip.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        pairs
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A file attached to a build request, referenced by URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// Body of `POST /builder/create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub secret: String,
    /// Becomes the project's `task_id`.
    #[validate(length(min = 1))]
    pub task: String,
    #[validate(range(min = 1))]
    pub round: i32,
    #[validate(length(min = 1))]
    pub nonce: String,
    #[validate(length(min = 1))]
    pub brief: String,
    #[serde(default)]
    pub checks: Vec<String>,
    #[validate(url)]
    pub evaluation_url: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl CreateProjectRequest {
    /// Validate field formats before submission.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate().map_err(CoreError::from)
    }
}

// ---------------------------------------------------------------------------
// Live updates
// ---------------------------------------------------------------------------

/// The `data` object of a `project_update` frame.
///
/// Only `status` is guaranteed; the remaining fields appear on some
/// transitions (e.g. URLs on completion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    pub status: ProjectStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub pages_url: Option<String>,
}

impl ProjectUpdate {
    /// Interpret a realtime payload, or `None` if it is not a status update.
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn valid_request() -> CreateProjectRequest {
        CreateProjectRequest {
            email: "dev@example.com".into(),
            secret: "s3cret".into(),
            task: "todo-app".into(),
            round: 1,
            nonce: "n-1".into(),
            brief: "A todo list".into(),
            checks: vec![],
            evaluation_url: "https://httpbin.org/post".into(),
            attachments: vec![],
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            ProjectStatus::Pending,
            ProjectStatus::Processing,
            ProjectStatus::Completed,
            ProjectStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProjectStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_matches!(
            "archived".parse::<ProjectStatus>(),
            Err(CoreError::InvalidStatus(s)) if s == "archived"
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(ProjectStatus::Completed.is_terminal());
        assert!(ProjectStatus::Failed.is_terminal());
        assert!(!ProjectStatus::Pending.is_terminal());
        assert!(!ProjectStatus::Processing.is_terminal());
    }

    #[test]
    fn record_deserializes_with_missing_optionals() {
        let json = serde_json::json!({
            "id": 7,
            "task_id": "abc",
            "email": "dev@example.com",
            "brief": "A todo list",
            "round_num": 1,
            "status": "processing",
            "created_at": "2025-01-02T03:04:05Z"
        });
        let record: ProjectRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.status, ProjectStatus::Processing);
        assert!(record.repo_url.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn filter_query_includes_status_only_when_set() {
        let pairs = ProjectFilter::recent(5).query_pairs();
        assert_eq!(pairs, vec![("skip", "0".into()), ("limit", "5".into())]);

        let filter = ProjectFilter {
            status: Some(ProjectStatus::Failed),
            ..Default::default()
        };
        assert!(filter.query_pairs().contains(&("status", "failed".into())));
    }

    #[test]
    fn valid_request_passes_check() {
        assert!(valid_request().check().is_ok());
    }

    #[test]
    fn bad_email_fails_check() {
        let request = CreateProjectRequest {
            email: "not-an-email".into(),
            ..valid_request()
        };
        assert_matches!(request.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn zero_round_fails_check() {
        let request = CreateProjectRequest {
            round: 0,
            ..valid_request()
        };
        assert_matches!(request.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn update_payload_parses_status_and_message() {
        let payload = serde_json::json!({
            "status": "processing",
            "message": "Repository created, generating code..."
        });
        let update = ProjectUpdate::from_payload(&payload).unwrap();
        assert_eq!(update.status, ProjectStatus::Processing);
        assert_eq!(
            update.message.as_deref(),
            Some("Repository created, generating code...")
        );
    }

    #[test]
    fn non_status_payload_is_not_an_update() {
        let payload = serde_json::json!({"type": "new_project"});
        assert!(ProjectUpdate::from_payload(&payload).is_none());
    }
}
