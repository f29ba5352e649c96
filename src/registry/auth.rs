// ABOUTME: Registry authentication: WWW-Authenticate parsing, scopes, and a token cache.
// ABOUTME: Supports anonymous access, basic credentials, and the bearer-token challenge flow.

use parking_lot::Mutex;
use reqwest::RequestBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::Credentials;

/// Token lifetime assumed when the token server does not say.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Challenge {
    Basic,
    Bearer {
        realm: Option<String>,
        service: Option<String>,
        scope: Option<String>,
    },
}

/// Parse a `WWW-Authenticate` header value.
///
/// Quoted values may contain commas (`scope="repository:a:pull,push"`).
pub(crate) fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut params = parse_params(rest);
    Some(Challenge::Bearer {
        realm: params.remove("realm"),
        service: params.remove("service"),
        scope: params.remove("scope"),
    })
}

fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        let key: String = std::iter::from_fn(|| chars.next_if(|c| *c != '=')).collect();
        if key.is_empty() || chars.next() != Some('=') {
            break;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => value.extend(chars.next()),
                    c => value.push(c),
                }
            }
        } else {
            value.extend(std::iter::from_fn(|| chars.next_if(|c| *c != ',')));
        }
        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    params
}

/// Repository access requested from a token server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Scope(Vec<String>);

impl Scope {
    pub fn pull(repository: &str) -> Self {
        Self(vec![format!("repository:{repository}:pull")])
    }

    pub fn push(repository: &str) -> Self {
        Self(vec![format!("repository:{repository}:pull,push")])
    }

    /// Also request pull access on another repository (cross-repository mounts).
    pub fn and_pull(mut self, repository: &str) -> Self {
        self.0.push(format!("repository:{repository}:pull"));
        self
    }

    /// Merge the scope a challenge asked for, if not already requested.
    pub fn with_challenge(&self, challenge_scope: Option<&str>) -> Vec<String> {
        let mut scopes = self.0.clone();
        if let Some(extra) = challenge_scope
            && !scopes.iter().any(|s| s == extra)
        {
            scopes.push(extra.to_string());
        }
        scopes
    }

    fn key(&self) -> String {
        self.0.join(" ")
    }
}

/// Credentials attached to a request.
#[derive(Clone)]
pub(crate) enum Authorization {
    Basic(Credentials),
    Bearer(String),
}

impl Authorization {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::Basic(c) => request.basic_auth(&c.username, Some(&c.password)),
            Authorization::Bearer(token) => request.bearer_auth(token),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

impl TokenResponse {
    /// The token and how long it stays valid.
    pub fn into_token(self) -> Option<(String, Duration)> {
        let ttl = self
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        self.token
            .or(self.access_token)
            .filter(|t| !t.is_empty())
            .map(|t| (t, ttl))
    }
}

struct CachedAuth {
    auth: Authorization,
    expires_at: Option<Instant>,
}

/// Authorizations keyed by registry host and scope.
#[derive(Default)]
pub(crate) struct TokenCache {
    entries: Mutex<HashMap<(String, String), CachedAuth>>,
}

impl TokenCache {
    pub fn get(&self, host: &str, scope: &Scope) -> Option<Authorization> {
        let key = (host.to_string(), scope.key());
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(cached) if cached.expires_at.is_none_or(|at| at > Instant::now()) => {
                Some(cached.auth.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Cache `auth`; `ttl` of `None` never expires (basic credentials).
    pub fn insert(&self, host: &str, scope: &Scope, auth: Authorization, ttl: Option<Duration>) {
        // Refresh a little early so a token never expires mid-request.
        let expires_at = ttl.map(|ttl| Instant::now() + ttl.saturating_sub(ttl / 10));
        self.entries
            .lock()
            .insert((host.to_string(), scope.key()), CachedAuth { auth, expires_at });
    }
}
