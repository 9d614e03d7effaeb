use anyhow::Result;

use poem::web::{Html, Path, Query};
use poem::{handler, session::Session, Response};

use askama::Template;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{format_created, BuildResult, Project};
use crate::views::utils::{lookup_project, revalidate_etag};
use crate::{db, get_context_for, BaseContext};

#[derive(Template)]
#[template(path = "index.html")]
struct IndexContext<'a> {
    base: BaseContext<'a>,
    projects: Vec<Project>,
}

#[handler]
pub async fn index(session: &Session) -> Result<Html<String>> {
    let mut conn = db::conn().await?;

    let projects = sqlx::query_as::<_, Project>(
        "SELECT id, owner, repo_name, master_branch FROM projects ORDER BY owner, repo_name",
    )
    .fetch_all(&mut conn)
    .await?;

    let tpl = IndexContext {
        base: get_context_for("index", session),
        projects,
    };

    Ok(Html(tpl.render()?))
}

/// One row of the project page: a change and the state of its latest build.
#[derive(sqlx::FromRow)]
struct ChangeSummary {
    number: i32,
    branch: String,
    title: String,
    created_at: DateTime<Utc>,
    build_status: Option<String>,
    build_result: Option<String>,
}

struct ChangeLine {
    number: i32,
    branch: String,
    title: String,
    created: String,
    status_label: String,
    result_code: String,
}

#[derive(Template)]
#[template(path = "project.html")]
struct ProjectContext<'a> {
    base: BaseContext<'a>,
    project: Project,
    changes: Vec<ChangeLine>,
}

#[handler]
pub async fn project(
    Path((owner, repo_name)): Path<(String, String)>,
    session: &Session,
) -> Result<Html<String>> {
    let mut conn = db::conn().await?;
    let project_row = lookup_project(&mut conn, &owner, &repo_name).await?;

    let changes = sqlx::query_as::<_, ChangeSummary>(
        "SELECT changes.number, changes.branch, changes.title, changes.created_at,
                latest.status AS build_status, latest.result AS build_result
         FROM changes
         LEFT JOIN LATERAL (
             SELECT status, result FROM builds
             WHERE builds.change_id = changes.id
             ORDER BY builds.created_at DESC LIMIT 1
         ) latest ON true
         WHERE changes.project_id = $1
         ORDER BY changes.created_at DESC
         LIMIT 100",
    )
    .bind(project_row.id)
    .fetch_all(&mut conn)
    .await?;

    let changes = changes
        .into_iter()
        .map(|summary| ChangeLine {
            number: summary.number,
            branch: summary.branch,
            title: summary.title,
            created: format_created(&summary.created_at),
            status_label: match summary.build_status.as_deref() {
                Some(status) => crate::models::status_display(status).to_string(),
                None => "No builds".to_string(),
            },
            result_code: summary.build_result.unwrap_or_else(|| "unknown".to_string()),
        })
        .collect();

    let tpl = ProjectContext {
        base: get_context_for("project", session),
        project: project_row,
        changes,
    };

    Ok(Html(tpl.render()?))
}

#[derive(Deserialize)]
pub struct ShieldParams {
    branch: Option<String>,
}

struct ShieldStyle {
    status: &'static str,
    color: &'static str,
    width: u32,
}

/// The badge text is a pure function of the current build's result. No
/// build on the branch means "unknown".
fn shield_style(result: Option<BuildResult>) -> ShieldStyle {
    match result {
        Some(BuildResult::Pass) => ShieldStyle {
            status: "pass",
            color: "#4c1",
            width: 40,
        },
        Some(BuildResult::Fail) => ShieldStyle {
            status: "fail",
            color: "#e05d44",
            width: 36,
        },
        Some(BuildResult::NonCriticalFail) => ShieldStyle {
            status: "non_critical_fail",
            color: "#dfb317",
            width: 112,
        },
        Some(BuildResult::Unknown) | None => ShieldStyle {
            status: "unknown",
            color: "#9f9f9f",
            width: 64,
        },
    }
}

#[derive(Template)]
#[template(path = "shield.svg", escape = "html")]
struct ShieldTemplate<'a> {
    status: &'a str,
    color: &'a str,
    label_width: u32,
    status_width: u32,
}

#[handler]
pub async fn shield(
    Path((owner, repo_name)): Path<(String, String)>,
    Query(params): Query<ShieldParams>,
) -> Result<Response> {
    let mut conn = db::conn().await?;
    let project_row = lookup_project(&mut conn, &owner, &repo_name).await?;

    let branch = params
        .branch
        .unwrap_or_else(|| project_row.master_branch.clone());

    let current: Option<(String,)> = sqlx::query_as(
        "SELECT builds.result FROM builds
         INNER JOIN changes ON builds.change_id = changes.id
         WHERE changes.project_id = $1 AND changes.branch = $2
         ORDER BY builds.created_at DESC LIMIT 1",
    )
    .bind(project_row.id)
    .bind(&branch)
    .fetch_optional(&mut conn)
    .await?;

    let style = shield_style(current.map(|(result,)| BuildResult::from_code(&result)));
    let svg = ShieldTemplate {
        status: style.status,
        color: style.color,
        label_width: 37,
        status_width: style.width,
    }
    .render()?;

    Ok(Response::builder()
        .content_type("image/svg+xml;charset=utf-8")
        .header("Cache-Control", "no-cache, no-store, must-revalidate")
        .header("ETag", revalidate_etag())
        .body(svg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shield_follows_result() {
        assert_eq!(shield_style(Some(BuildResult::Pass)).status, "pass");
        assert_eq!(shield_style(Some(BuildResult::Fail)).status, "fail");
        assert_eq!(
            shield_style(Some(BuildResult::NonCriticalFail)).status,
            "non_critical_fail"
        );
        assert_eq!(shield_style(Some(BuildResult::Unknown)).status, "unknown");
    }

    #[test]
    fn shield_without_build_is_unknown() {
        assert_eq!(shield_style(None).status, "unknown");
    }

    #[test]
    fn shield_renders() {
        let style = shield_style(Some(BuildResult::Pass));
        let svg = ShieldTemplate {
            status: style.status,
            color: style.color,
            label_width: 37,
            status_width: style.width,
        }
        .render()
        .unwrap();
        assert!(svg.contains("pass"));
        assert!(svg.contains("#4c1"));
    }
}
