use chrono::{DateTime, Utc};

/// Result codes a build or task can carry. Stored as text in the database,
/// parsed at the edge so the mapping to display strings stays in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResult {
    Pass,
    Fail,
    NonCriticalFail,
    Unknown,
}

impl BuildResult {
    pub fn from_code(code: &str) -> Self {
        match code {
            "pass" => BuildResult::Pass,
            "fail" => BuildResult::Fail,
            "non_critical_fail" => BuildResult::NonCriticalFail,
            _ => BuildResult::Unknown,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            BuildResult::Pass => "pass",
            BuildResult::Fail => "fail",
            BuildResult::NonCriticalFail => "non_critical_fail",
            BuildResult::Unknown => "unknown",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            BuildResult::Pass => "Passed",
            BuildResult::Fail => "Failed",
            BuildResult::NonCriticalFail => "Failed (non-critical)",
            BuildResult::Unknown => "Unknown",
        }
    }
}

pub fn status_display(status: &str) -> &'static str {
    match status {
        "pending" => "Pending",
        "running" => "Running",
        "stopping" => "Stopping",
        "stopped" => "Stopped",
        "finished" => "Finished",
        _ => "Unknown",
    }
}

pub fn is_terminal_status(status: &str) -> bool {
    matches!(status, "finished" | "stopped")
}

pub fn is_known_status(status: &str) -> bool {
    matches!(
        status,
        "pending" | "running" | "stopping" | "stopped" | "finished"
    )
}

pub fn display_sha(sha: &str) -> &str {
    &sha[..sha.len().min(7)]
}

// Day of month without a leading zero, "3 Aug 2026, 14:05".
pub fn format_created(created_at: &DateTime<Utc>) -> String {
    created_at
        .format("%e %b %Y, %H:%M")
        .to_string()
        .trim_start()
        .to_string()
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Project {
    pub id: i64,
    pub owner: String,
    pub repo_name: String,
    pub master_branch: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Change {
    pub id: i64,
    pub project_id: i64,
    pub number: i32,
    pub branch: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Commit {
    pub id: i64,
    pub sha: String,
    pub title: String,
}

impl Commit {
    pub fn display_sha(&self) -> &str {
        display_sha(&self.sha)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Build {
    pub id: i64,
    pub change_id: i64,
    pub number: i32,
    pub commit_id: i64,
    pub status: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

impl Build {
    pub fn result(&self) -> BuildResult {
        BuildResult::from_code(&self.result)
    }

    pub fn is_finished(&self) -> bool {
        is_terminal_status(&self.status)
    }

    pub fn status_display(&self) -> &'static str {
        status_display(&self.status)
    }

    /// The one-line status shown on the build page and in the status
    /// payload. Finished builds show their result; a running build shows
    /// the phase of the task currently executing.
    pub fn full_status_display(&self, tasks: &[Task]) -> String {
        if self.is_finished() {
            return self.result().display().to_string();
        }

        let running_phase = tasks
            .iter()
            .find(|task| task.status == "running")
            .map(|task| task.phase.as_str());

        match running_phase {
            Some(phase) => format!("{} ({})", self.status_display(), phase),
            None => self.status_display().to_string(),
        }
    }

    pub fn created_display(&self) -> String {
        format_created(&self.created_at)
    }
}

/// A build joined with its commit, the shape the change page and the
/// change-status payload work with.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BuildWithCommit {
    pub id: i64,
    pub number: i32,
    pub status: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
    pub sha: String,
    pub commit_title: String,
}

impl BuildWithCommit {
    pub fn display_sha(&self) -> &str {
        display_sha(&self.sha)
    }

    pub fn status_display(&self) -> &'static str {
        status_display(&self.status)
    }

    pub fn created_display(&self) -> String {
        format_created(&self.created_at)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub build_id: i64,
    pub slug: String,
    pub name: String,
    pub phase: String,
    pub status: String,
    pub result: String,
}

impl Task {
    pub fn status_display(&self) -> &'static str {
        status_display(&self.status)
    }
}

/// A change is complete once it has builds and none of them can still move.
pub fn change_is_complete<'a>(statuses: impl IntoIterator<Item = &'a str>) -> bool {
    let mut seen_any = false;
    for status in statuses {
        seen_any = true;
        if !is_terminal_status(status) {
            return false;
        }
    }
    seen_any
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn build_with(status: &str, result: &str) -> Build {
        Build {
            id: 1,
            change_id: 1,
            number: 1,
            commit_id: 1,
            status: status.into(),
            result: result.into(),
            created_at: Utc.ymd(2026, 8, 3).and_hms(14, 5, 0),
        }
    }

    fn task_with(slug: &str, phase: &str, status: &str) -> Task {
        Task {
            id: 1,
            build_id: 1,
            slug: slug.into(),
            name: slug.into(),
            phase: phase.into(),
            status: status.into(),
            result: "unknown".into(),
        }
    }

    #[test]
    fn result_codes_round_trip() {
        for code in ["pass", "fail", "non_critical_fail", "unknown"] {
            assert_eq!(BuildResult::from_code(code).code(), code);
        }
        assert_eq!(BuildResult::from_code("exploded"), BuildResult::Unknown);
    }

    #[test]
    fn display_sha_is_seven_chars() {
        let commit = Commit {
            id: 1,
            sha: "0123456789abcdef0123456789abcdef01234567".into(),
            title: "fix".into(),
        };
        assert_eq!(commit.display_sha(), "0123456");

        let short = Commit {
            id: 2,
            sha: "0123".into(),
            title: "".into(),
        };
        assert_eq!(short.display_sha(), "0123");
    }

    #[test]
    fn timestamp_has_no_leading_zero() {
        assert_eq!(
            build_with("pending", "unknown").created_display(),
            "3 Aug 2026, 14:05"
        );
    }

    #[test]
    fn completion_requires_builds() {
        assert!(!change_is_complete(std::iter::empty::<&str>()));
        assert!(!change_is_complete(["running"]));
        assert!(!change_is_complete(["finished", "pending"]));
        assert!(change_is_complete(["finished", "stopped"]));
    }

    #[test]
    fn full_status_shows_result_when_finished() {
        let build = build_with("finished", "non_critical_fail");
        assert_eq!(
            build.full_status_display(&[task_with("lint", "prepare", "finished")]),
            "Failed (non-critical)"
        );
    }

    #[test]
    fn full_status_shows_running_phase() {
        let build = build_with("running", "unknown");
        let tasks = vec![
            task_with("checkout", "prepare", "finished"),
            task_with("unit", "test", "running"),
        ];
        assert_eq!(build.full_status_display(&tasks), "Running (test)");

        let no_running = vec![task_with("checkout", "prepare", "finished")];
        assert_eq!(build.full_status_display(&no_running), "Running");
    }
}
