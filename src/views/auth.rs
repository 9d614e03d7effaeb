use crate::error::CinderError;
use crate::{BASE_URL, GITHUB_CLIENT_ID, GITHUB_CLIENT_SECRET, SUPERUSERS};
use anyhow::Result;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl, Scope};
use poem::web::Redirect;
use poem::{handler, session::Session, web::Query};
use serde::{Deserialize, Serialize};

lazy_static::lazy_static!(
    pub static ref REDIRECT_URL: String = std::env::var("OAUTH_REDIRECT_URL")
        .unwrap_or_else(|_| format!("{}/auth/callback", &*BASE_URL));
);

/// What we keep in the cookie session once the OAuth dance succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub login: String,
    pub is_superuser: bool,
}

#[derive(Deserialize)]
pub struct Callback {
    code: String,
}

#[handler]
pub async fn logout(session: &Session) -> Result<Redirect> {
    session.remove("user");
    Ok(Redirect::see_other("/"))
}

#[handler]
pub async fn callback(
    Query(Callback { code }): Query<Callback>,
    session: &Session,
) -> Result<Redirect> {
    let client = reqwest::Client::new();
    let req = client
        .post("https://github.com/login/oauth/access_token")
        .header("Accept", "application/json")
        .form(&[
            ("code", code),
            ("client_id", GITHUB_CLIENT_ID.clone()),
            ("client_secret", GITHUB_CLIENT_SECRET.clone()),
            ("redirect_uri", REDIRECT_URL.clone()),
        ])
        .build()?;
    let res = client.execute(req).await?;
    let body: serde_json::Value = res.json().await?;

    let token = match body["access_token"].as_str() {
        Some(token) => token,
        None => return Ok(Redirect::see_other("/?invalid-auth")),
    };

    match fetch_login(token).await {
        Ok(login_name) => {
            let user = SessionUser {
                is_superuser: SUPERUSERS.contains(&login_name),
                login: login_name,
            };
            session.set("user", user);
            Ok(Redirect::see_other("/"))
        }
        Err(_) => Err(CinderError::authentication_error(session).into()),
    }
}

pub async fn fetch_login(token: &str) -> Result<String> {
    let client = reqwest::Client::new();
    let req = client
        .get("https://api.github.com/user")
        .header("Authorization", format!("Bearer {}", token))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "cinder")
        .build()?;
    let res = client.execute(req).await?;
    let body: serde_json::Value = res.json().await?;
    body["login"]
        .as_str()
        .map(|login_name| login_name.to_string())
        .ok_or_else(|| anyhow::format_err!("user payload has no login"))
}

#[handler]
pub async fn login() -> Result<Redirect> {
    let client = BasicClient::new(
        ClientId::new(GITHUB_CLIENT_ID.clone()),
        None,
        AuthUrl::new("https://github.com/login/oauth/authorize".to_string())?,
        None,
    )
    .set_redirect_uri(RedirectUrl::new(REDIRECT_URL.clone())?);

    let (url, _) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new("read:user".into()))
        .url();

    Ok(Redirect::see_other(url))
}
