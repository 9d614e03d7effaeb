use anyhow::Result;

use poem::web::{Form, Html, Json, Path, Redirect};
use poem::{handler, session::Session};

use askama::Template;
use itertools::Itertools;
use serde::Deserialize;
use serde_json::json;

use crate::error::CinderError;
use crate::models::{Build, Change, Commit, Project, Task};
use crate::views::change::build_url;
use crate::views::utils::{build_tasks, is_superuser, lookup_build, lookup_change, lookup_project};
use crate::{db, get_context_for, queue, BaseContext, ARCHIVE_AUTH};

async fn lookup_chain(
    conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>,
    owner: &str,
    repo_name: &str,
    change_pk: i32,
    build_pk: i32,
) -> Result<(Project, Change, Build)> {
    let project = lookup_project(&mut *conn, owner, repo_name).await?;
    let change = lookup_change(&mut *conn, &project, change_pk).await?;
    let build_row = lookup_build(&mut *conn, &change, build_pk).await?;

    Ok((project, change, build_row))
}

struct TaskLine {
    slug: String,
    name: String,
    status_label: String,
    result_code: String,
}

struct PhaseLine {
    name: String,
    tasks: Vec<TaskLine>,
}

#[derive(Template)]
#[template(path = "build.html")]
struct BuildContext<'a> {
    base: BaseContext<'a>,
    project: Project,
    change: Change,
    build_number: i32,
    build_url: String,
    status_full: String,
    result_code: String,
    created: String,
    commit_sha: String,
    commit_short: String,
    commit_title: String,
    phases: Vec<PhaseLine>,
}

// Tasks come back ordered by id, which is insertion order, so grouping
// consecutive rows keeps the orchestrator's phase ordering.
fn group_by_phase(tasks: &[Task]) -> Vec<PhaseLine> {
    tasks
        .iter()
        .group_by(|task| task.phase.clone())
        .into_iter()
        .map(|(phase, tasks)| PhaseLine {
            name: phase,
            tasks: tasks
                .map(|task| TaskLine {
                    slug: task.slug.clone(),
                    name: task.name.clone(),
                    status_label: task.status_display().to_string(),
                    result_code: task.result.clone(),
                })
                .collect(),
        })
        .collect()
}

#[handler]
pub async fn build(
    Path((owner, repo_name, change_pk, build_pk)): Path<(String, String, i32, i32)>,
    session: &Session,
) -> Result<Html<String>> {
    let mut conn = db::conn().await?;
    let (project, change, build_row) =
        lookup_chain(&mut conn, &owner, &repo_name, change_pk, build_pk).await?;
    let commit = sqlx::query_as::<_, Commit>("SELECT id, sha, title FROM commits WHERE id = $1")
        .bind(build_row.commit_id)
        .fetch_one(&mut conn)
        .await?;
    let tasks = build_tasks(&mut conn, &build_row).await?;

    let tpl = BuildContext {
        base: get_context_for("build", session),
        build_number: build_row.number,
        build_url: build_url(&owner, &repo_name, change.number, build_row.number),
        status_full: build_row.full_status_display(&tasks),
        result_code: build_row.result.clone(),
        created: build_row.created_display(),
        commit_short: commit.display_sha().to_string(),
        commit_sha: commit.sha,
        commit_title: commit.title,
        phases: group_by_phase(&tasks),
        project,
        change,
    };

    Ok(Html(tpl.render()?))
}

#[derive(Debug, Deserialize)]
pub struct BuildActionForm {
    resume: Option<String>,
    restart: Option<String>,
    stop: Option<String>,
}

fn requested_action(form: &BuildActionForm) -> Option<&'static str> {
    if form.resume.is_some() {
        Some("resume")
    } else if form.restart.is_some() {
        Some("restart")
    } else if form.stop.is_some() {
        Some("stop")
    } else {
        None
    }
}

#[handler]
pub async fn build_action(
    Path((owner, repo_name, change_pk, build_pk)): Path<(String, String, i32, i32)>,
    Form(form): Form<BuildActionForm>,
    session: &Session,
) -> Result<Redirect> {
    let mut conn = db::conn().await?;
    let (_, change, build_row) =
        lookup_chain(&mut conn, &owner, &repo_name, change_pk, build_pk).await?;

    // Lifecycle commands are superuser-only; anyone else just lands back
    // on the build page with nothing done.
    if is_superuser(session) {
        if let Some(action) = requested_action(&form) {
            queue::publish_control(build_row.id, action).await?;
        }
    }

    Ok(Redirect::see_other(build_url(
        &owner,
        &repo_name,
        change.number,
        build_row.number,
    )))
}

/// JSON snapshot polled by the build page: one entry per task, keyed by
/// slug, plus the overall status line and the finished flag.
fn build_status_payload(
    owner: &str,
    repo_name: &str,
    change: &Change,
    build_row: &Build,
    tasks: &[Task],
) -> serde_json::Value {
    let url = build_url(owner, repo_name, change.number, build_row.number);
    let entries = tasks
        .iter()
        .map(|task| {
            (
                task.slug.clone(),
                json!({
                    "url": format!("{}#task-{}", url, task.slug),
                    "name": task.name,
                    "phase": task.phase,
                    "status": task.status_display(),
                    "result": task.result,
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>();

    json!({
        "status": build_row.full_status_display(tasks),
        "result": build_row.result,
        "tasks": entries,
        "finished": build_row.is_finished(),
    })
}

#[handler]
pub async fn build_status(
    Path((owner, repo_name, change_pk, build_pk)): Path<(String, String, i32, i32)>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = db::conn().await?;
    let (_, change, build_row) =
        lookup_chain(&mut conn, &owner, &repo_name, change_pk, build_pk).await?;
    let tasks = build_tasks(&mut conn, &build_row).await?;

    Ok(Json(build_status_payload(
        &owner, &repo_name, &change, &build_row, &tasks,
    )))
}

#[handler]
pub async fn build_code(
    Path((owner, repo_name, change_pk, build_pk)): Path<(String, String, i32, i32)>,
) -> Result<Redirect> {
    let mut conn = db::conn().await?;
    let (_, _, build_row) = lookup_chain(&mut conn, &owner, &repo_name, change_pk, build_pk).await?;
    let commit = sqlx::query_as::<_, Commit>("SELECT id, sha, title FROM commits WHERE id = $1")
        .bind(build_row.commit_id)
        .fetch_one(&mut conn)
        .await?;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let mut req = client.get(format!(
        "https://github.com/{}/{}/archive/{}.zip",
        owner, repo_name, commit.sha
    ));
    if let Some((username, token)) = &*ARCHIVE_AUTH {
        req = req.basic_auth(username, Some(token));
    }
    let res = req.send().await?;

    let location = res
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or(CinderError::ArchiveUnavailable)?;

    Ok(Redirect::see_other(location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn change() -> Change {
        Change {
            id: 10,
            project_id: 1,
            number: 42,
            branch: "master".into(),
            title: "speed up the parser".into(),
            created_at: chrono::Utc.ymd(2026, 8, 3).and_hms(9, 0, 0),
        }
    }

    fn build_row(status: &str, result: &str) -> Build {
        Build {
            id: 77,
            change_id: 10,
            number: 3,
            commit_id: 5,
            status: status.into(),
            result: result.into(),
            created_at: chrono::Utc.ymd(2026, 8, 3).and_hms(9, 30, 0),
        }
    }

    fn task(slug: &str, phase: &str, status: &str, result: &str) -> Task {
        Task {
            id: 1,
            build_id: 77,
            slug: slug.into(),
            name: format!("Task {}", slug),
            phase: phase.into(),
            status: status.into(),
            result: result.into(),
        }
    }

    #[test]
    fn payload_has_one_entry_per_task() {
        let tasks = vec![
            task("checkout", "prepare", "finished", "pass"),
            task("unit", "test", "running", "unknown"),
        ];
        let payload =
            build_status_payload("alice", "widget", &change(), &build_row("running", "unknown"), &tasks);

        assert_eq!(payload["tasks"].as_object().unwrap().len(), 2);
        assert_eq!(payload["finished"], json!(false));
        assert_eq!(payload["status"], json!("Running (test)"));
    }

    #[test]
    fn payload_task_entry_shape() {
        let tasks = vec![task("unit", "test", "finished", "pass")];
        let payload =
            build_status_payload("alice", "widget", &change(), &build_row("finished", "pass"), &tasks);

        let entry = &payload["tasks"]["unit"];
        assert_eq!(
            entry["url"],
            json!("/alice/widget/change/42/build/3#task-unit")
        );
        assert_eq!(entry["name"], json!("Task unit"));
        assert_eq!(entry["phase"], json!("test"));
        assert_eq!(entry["status"], json!("Finished"));
        assert_eq!(entry["result"], json!("pass"));
        assert_eq!(payload["finished"], json!(true));
        assert_eq!(payload["status"], json!("Passed"));
    }

    #[test]
    fn form_actions_are_recognized() {
        let form = |resume, restart, stop| BuildActionForm {
            resume,
            restart,
            stop,
        };

        assert_eq!(requested_action(&form(Some("".into()), None, None)), Some("resume"));
        assert_eq!(requested_action(&form(None, Some("".into()), None)), Some("restart"));
        assert_eq!(requested_action(&form(None, None, Some("".into()))), Some("stop"));
        assert_eq!(requested_action(&form(None, None, None)), None);
    }

    #[test]
    fn tasks_group_by_consecutive_phase() {
        let tasks = vec![
            task("checkout", "prepare", "finished", "pass"),
            task("deps", "prepare", "finished", "pass"),
            task("unit", "test", "running", "unknown"),
        ];
        let phases = group_by_phase(&tasks);
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].name, "prepare");
        assert_eq!(phases[0].tasks.len(), 2);
        assert_eq!(phases[1].name, "test");
        assert_eq!(phases[1].tasks[0].slug, "unit");
    }
}
