mod db;
mod error;
mod models;
mod queue;
mod views;

use std::collections::HashSet;

use anyhow::Result;

use poem::{
    endpoint::StaticFilesEndpoint,
    get,
    http::StatusCode,
    listener::TcpListener,
    session::{CookieConfig, CookieSession, Session},
    web::{cookie::CookieKey, Redirect},
    EndpointExt, IntoResponse, Response, Route, Server,
};

lazy_static::lazy_static! {
    pub static ref BASE_URL: String = std::env::var("BASE_URL")
        .unwrap_or_else(|_| "http://localhost:3000".into());
    pub static ref SUPERUSERS: HashSet<String> = std::env::var("SUPERUSERS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|login| !login.is_empty())
        .map(Into::into)
        .collect();
    pub static ref GITHUB_CLIENT_ID: String =
        std::env::var("GITHUB_CLIENT_ID").unwrap_or_default();
    pub static ref GITHUB_CLIENT_SECRET: String =
        std::env::var("GITHUB_CLIENT_SECRET").unwrap_or_default();
    pub static ref ARCHIVE_AUTH: Option<(String, String)> = match (
        std::env::var("GITHUB_USERNAME"),
        std::env::var("GITHUB_ACCESS_TOKEN"),
    ) {
        (Ok(username), Ok(token)) => Some((username, token)),
        _ => None,
    };
}

pub struct BaseContext<'a> {
    pub cur_module: &'a str,
    pub base_url: &'a str,
    pub logged_in: bool,
    pub is_superuser: bool,
}

pub fn get_context_for<'a>(module_name: &'a str, session: &Session) -> BaseContext<'a> {
    let user = views::utils::current_user(session);
    BaseContext {
        cur_module: module_name,
        base_url: &*BASE_URL,
        logged_in: user.is_some(),
        is_superuser: user.map_or(false, |user| user.is_superuser),
    }
}

fn setup_status_handler() {
    tokio::spawn(async {
        loop {
            let _ = queue::start_status_handler().await;
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    });
}

fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();
}

async fn setup_db() -> Result<()> {
    db::init_pool(&std::env::var("DATABASE_URL").unwrap()).await?;
    sqlx::migrate!("./migrations")
        .run(db::POOL.get().unwrap())
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    setup_db().await?;
    setup_status_handler();

    let app = Route::new()
        .at("/", get(views::project::index))
        .at("/auth/callback", get(views::auth::callback))
        .at("/auth/login", get(views::auth::login))
        .at("/auth/logout", get(views::auth::logout))
        .at("/:owner/:repo_name", get(views::project::project))
        .at("/:owner/:repo_name/shield.svg", get(views::project::shield))
        .at(
            "/:owner/:repo_name/change/:change_pk",
            get(views::change::change),
        )
        .at(
            "/:owner/:repo_name/change/:change_pk/status",
            get(views::change::change_status),
        )
        .at(
            "/:owner/:repo_name/change/:change_pk/build/:build_pk",
            get(views::build::build).post(views::build::build_action),
        )
        .at(
            "/:owner/:repo_name/change/:change_pk/build/:build_pk/status",
            get(views::build::build_status),
        )
        .at(
            "/:owner/:repo_name/change/:change_pk/build/:build_pk/code",
            get(views::build::build_code),
        )
        .nest(
            "/static",
            StaticFilesEndpoint::new("./static").show_files_listing(),
        )
        .with(CookieSession::new(CookieConfig::private(
            CookieKey::generate(),
        )))
        .inspect_all_err(|err| {
            tracing::error!("{:?}", err);
        })
        .catch_error(|err: crate::error::CinderError| async move {
            match err {
                crate::error::CinderError::NotFound => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body("Not found"),
                crate::error::CinderError::AuthenticationError => {
                    Redirect::see_other("/").into_response()
                }
                crate::error::CinderError::ArchiveUnavailable => Response::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .body("Archive unavailable"),
            }
        });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    Server::new(TcpListener::bind(bind_addr)).run(app).await?;

    Ok(())
}
