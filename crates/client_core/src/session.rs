//! Authenticated session handed to the HTTP collaborators at construction.

use std::fmt;

use anyhow::{anyhow, Context, Result};
use reqwest::{header, RequestBuilder};
use url::Url;

pub const CSRF_HEADER: &str = "X-Frappe-CSRF-Token";

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// API key pair, sent as `Authorization: token key:secret`.
    Token { key: String, secret: String },
    /// Browser-style session id cookie.
    Sid(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token { key, .. } => f
                .debug_struct("Token")
                .field("key", key)
                .field("secret", &"<redacted>")
                .finish(),
            Self::Sid(_) => f.debug_tuple("Sid").field(&"<redacted>").finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    server_url: Url,
    auth: Option<Auth>,
    csrf_token: Option<String>,
}

impl Session {
    pub fn new(server_url: &str) -> Result<Self> {
        let server_url = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url: {server_url}"))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        Ok(Self {
            server_url,
            auth: None,
            csrf_token: None,
        })
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// The token is issued by the identity provider; the client only forwards it.
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    /// Builds `{server_url}/{segments...}` with each segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.server_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.auth {
            Some(Auth::Token { key, secret }) => {
                request.header(header::AUTHORIZATION, format!("token {key}:{secret}"))
            }
            Some(Auth::Sid(sid)) => request.header(header::COOKIE, format!("sid={sid}")),
            None => request,
        };
        match &self.csrf_token {
            Some(token) => request.header(CSRF_HEADER, token),
            None => request,
        }
    }
}
