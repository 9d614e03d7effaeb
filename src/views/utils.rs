use anyhow::Result;
use poem::session::Session;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

use crate::error::CinderError;
use crate::models::{Build, Change, Project, Task};
use crate::views::auth::SessionUser;

pub fn current_user(session: &Session) -> Option<SessionUser> {
    session.get::<SessionUser>("user")
}

pub fn is_superuser(session: &Session) -> bool {
    current_user(session).map_or(false, |user| user.is_superuser)
}

/// The shield is meant to be embedded on external pages, so it carries a
/// fresh ETag on every request and asks caches to always revalidate.
pub fn revalidate_etag() -> String {
    format!("{:x}", chrono::Utc::now().timestamp_nanos())
}

pub async fn lookup_project(
    conn: &mut PoolConnection<Postgres>,
    owner: &str,
    repo_name: &str,
) -> Result<Project> {
    sqlx::query_as::<_, Project>(
        "SELECT id, owner, repo_name, master_branch FROM projects
         WHERE owner = $1 AND repo_name = $2",
    )
    .bind(owner)
    .bind(repo_name)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CinderError::NotFound.into())
}

pub async fn lookup_change(
    conn: &mut PoolConnection<Postgres>,
    project: &Project,
    change_pk: i32,
) -> Result<Change> {
    sqlx::query_as::<_, Change>(
        "SELECT id, project_id, number, branch, title, created_at FROM changes
         WHERE project_id = $1 AND number = $2",
    )
    .bind(project.id)
    .bind(change_pk)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CinderError::NotFound.into())
}

pub async fn lookup_build(
    conn: &mut PoolConnection<Postgres>,
    change: &Change,
    build_pk: i32,
) -> Result<Build> {
    sqlx::query_as::<_, Build>(
        "SELECT id, change_id, number, commit_id, status, result, created_at FROM builds
         WHERE change_id = $1 AND number = $2",
    )
    .bind(change.id)
    .bind(build_pk)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CinderError::NotFound.into())
}

pub async fn build_tasks(
    conn: &mut PoolConnection<Postgres>,
    build: &Build,
) -> Result<Vec<Task>> {
    Ok(sqlx::query_as::<_, Task>(
        "SELECT id, build_id, slug, name, phase, status, result FROM tasks
         WHERE build_id = $1 ORDER BY id",
    )
    .bind(build.id)
    .fetch_all(&mut *conn)
    .await?)
}
