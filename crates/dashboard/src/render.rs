//! One-line terminal renderings of projects and stats.

use launchpad_core::project::{ProjectRecord, ProjectStats};

/// e.g. `todo-app  [completed]  round 1  https://user.github.io/todo-app`
pub fn project_line(record: &ProjectRecord) -> String {
    let mut line = format!(
        "{}  [{}]  round {}",
        record.task_id, record.status, record.round_num
    );
    if let Some(url) = record.pages_url.as_deref().or(record.repo_url.as_deref()) {
        line.push_str("  ");
        line.push_str(url);
    }
    if let Some(error) = &record.error_message {
        line.push_str("  error: ");
        line.push_str(error);
    }
    line
}

pub fn stats_line(stats: &ProjectStats) -> String {
    format!(
        "projects: {} total, {} completed, {} processing, {} pending, {} failed",
        stats.total_projects, stats.completed, stats.processing, stats.pending, stats.failed
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use launchpad_core::project::ProjectStatus;

    use super::*;

    fn record(status: ProjectStatus) -> ProjectRecord {
        ProjectRecord {
            id: 1,
            task_id: "todo-app".into(),
            email: "dev@example.com".into(),
            brief: "A todo list".into(),
            round_num: 2,
            status,
            repo_url: None,
            pages_url: None,
            commit_sha: None,
            created_at: Utc::now(),
            updated_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    #[test]
    fn in_progress_project_has_no_url() {
        assert_eq!(
            project_line(&record(ProjectStatus::Processing)),
            "todo-app  [processing]  round 2"
        );
    }

    #[test]
    fn pages_url_preferred_over_repo() {
        let record = ProjectRecord {
            repo_url: Some("https://github.com/u/todo-app".into()),
            pages_url: Some("https://u.github.io/todo-app".into()),
            ..record(ProjectStatus::Completed)
        };
        assert!(project_line(&record).ends_with("https://u.github.io/todo-app"));
    }

    #[test]
    fn failure_shows_error() {
        let record = ProjectRecord {
            error_message: Some("GitHub API rate limited".into()),
            ..record(ProjectStatus::Failed)
        };
        assert!(project_line(&record).ends_with("error: GitHub API rate limited"));
    }

    #[test]
    fn stats_line_lists_every_count() {
        let stats = ProjectStats {
            total_projects: 6,
            completed: 3,
            processing: 1,
            failed: 1,
            pending: 1,
        };
        assert_eq!(
            stats_line(&stats),
            "projects: 6 total, 3 completed, 1 processing, 1 pending, 1 failed"
        );
    }
}
