use anyhow::Result;

use poem::web::{Html, Json, Path};
use poem::{handler, session::Session};

use askama::Template;
use serde_json::json;

use crate::models::{change_is_complete, BuildWithCommit, Change, Project};
use crate::views::utils::{lookup_change, lookup_project};
use crate::{db, get_context_for, BaseContext};

async fn change_builds(
    conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>,
    change_row: &Change,
) -> Result<Vec<BuildWithCommit>> {
    Ok(sqlx::query_as::<_, BuildWithCommit>(
        "SELECT builds.id, builds.number, builds.status, builds.result, builds.created_at,
                commits.sha, commits.title AS commit_title
         FROM builds INNER JOIN commits ON builds.commit_id = commits.id
         WHERE builds.change_id = $1
         ORDER BY builds.created_at DESC",
    )
    .bind(change_row.id)
    .fetch_all(&mut *conn)
    .await?)
}

pub fn build_url(owner: &str, repo_name: &str, change_pk: i32, build_pk: i32) -> String {
    format!(
        "/{}/{}/change/{}/build/{}",
        owner, repo_name, change_pk, build_pk
    )
}

struct BuildLine {
    number: i32,
    url: String,
    label: String,
    title: String,
    created: String,
    status_label: String,
    result_code: String,
}

#[derive(Template)]
#[template(path = "change.html")]
struct ChangeContext<'a> {
    base: BaseContext<'a>,
    project: Project,
    change: Change,
    complete: bool,
    builds: Vec<BuildLine>,
}

#[handler]
pub async fn change(
    Path((owner, repo_name, change_pk)): Path<(String, String, i32)>,
    session: &Session,
) -> Result<Html<String>> {
    let mut conn = db::conn().await?;
    let project = lookup_project(&mut conn, &owner, &repo_name).await?;
    let change_row = lookup_change(&mut conn, &project, change_pk).await?;
    let builds = change_builds(&mut conn, &change_row).await?;

    let complete = change_is_complete(builds.iter().map(|build| build.status.as_str()));
    let builds = builds
        .iter()
        .map(|build| BuildLine {
            number: build.number,
            url: build_url(&owner, &repo_name, change_row.number, build.number),
            label: build.display_sha().to_string(),
            title: build.commit_title.clone(),
            created: build.created_display(),
            status_label: build.status_display().to_string(),
            result_code: build.result.clone(),
        })
        .collect();

    let tpl = ChangeContext {
        base: get_context_for("change", session),
        project,
        change: change_row,
        complete,
        builds,
    };

    Ok(Html(tpl.render()?))
}

/// JSON snapshot polled by the change page: one entry per build, keyed by
/// the build's display number, plus the change's completion flag.
fn change_status_payload(
    owner: &str,
    repo_name: &str,
    change_row: &Change,
    builds: &[BuildWithCommit],
) -> serde_json::Value {
    let entries = builds
        .iter()
        .map(|build| {
            (
                build.number.to_string(),
                json!({
                    "url": build_url(owner, repo_name, change_row.number, build.number),
                    "label": build.display_sha(),
                    "title": build.commit_title,
                    "timestamp": build.created_display(),
                    "status": build.status_display(),
                    "result": build.result,
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>();

    json!({
        "builds": entries,
        "complete": change_is_complete(builds.iter().map(|build| build.status.as_str())),
    })
}

#[handler]
pub async fn change_status(
    Path((owner, repo_name, change_pk)): Path<(String, String, i32)>,
) -> Result<Json<serde_json::Value>> {
    let mut conn = db::conn().await?;
    let project = lookup_project(&mut conn, &owner, &repo_name).await?;
    let change_row = lookup_change(&mut conn, &project, change_pk).await?;
    let builds = change_builds(&mut conn, &change_row).await?;

    Ok(Json(change_status_payload(
        &owner, &repo_name, &change_row, &builds,
    )))
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

    fn build(number: i32, status: &str, result: &str) -> BuildWithCommit {
        BuildWithCommit {
            id: number as i64,
            number,
            status: status.into(),
            result: result.into(),
            created_at: chrono::Utc.ymd(2026, 8, 3).and_hms(9, 30, 0),
            sha: "deadbeefcafe0123456789".into(),
            commit_title: "speed up the parser".into(),
        }
    }

    #[test]
    fn payload_has_one_entry_per_build() {
        let builds = vec![build(1, "finished", "pass"), build(2, "running", "unknown")];
        let payload = change_status_payload("alice", "widget", &change(), &builds);

        assert_eq!(payload["builds"].as_object().unwrap().len(), 2);
        assert_eq!(payload["complete"], json!(false));
    }

    #[test]
    fn payload_complete_when_all_builds_finished() {
        let builds = vec![build(1, "finished", "pass"), build(2, "stopped", "unknown")];
        let payload = change_status_payload("alice", "widget", &change(), &builds);
        assert_eq!(payload["complete"], json!(true));
    }

    #[test]
    fn payload_entry_shape() {
        let builds = vec![build(7, "finished", "non_critical_fail")];
        let payload = change_status_payload("alice", "widget", &change(), &builds);

        let entry = &payload["builds"]["7"];
        assert_eq!(entry["url"], json!("/alice/widget/change/42/build/7"));
        assert_eq!(entry["label"], json!("deadbee"));
        assert_eq!(entry["title"], json!("speed up the parser"));
        assert_eq!(entry["timestamp"], json!("3 Aug 2026, 09:30"));
        assert_eq!(entry["status"], json!("Finished"));
        assert_eq!(entry["result"], json!("non_critical_fail"));
    }
}
