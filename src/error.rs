use poem::session::Session;

#[derive(thiserror::Error, Debug)]
pub enum CinderError {
    NotFound,
    AuthenticationError,
    ArchiveUnavailable,
}

impl std::fmt::Display for CinderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CinderError::NotFound => f.write_str("Not found"),
            CinderError::AuthenticationError => f.write_str("Authentication error"),
            CinderError::ArchiveUnavailable => f.write_str("Archive unavailable"),
        }
    }
}

impl CinderError {
    pub fn authentication_error(session: &Session) -> Self {
        session.remove("user");
        Self::AuthenticationError
    }
}
