// ABOUTME: HTTP transport for the OCI distribution API.
// ABOUTME: Per-host scheme and TLS policy, credential lookup, and challenge-driven authorization.

use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use snafu::{OptionExt, ResultExt};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

use super::auth::{Authorization, Challenge, Scope, TokenCache, TokenResponse, parse_challenge};
use super::error::{
    BuildClientSnafu, InvalidRealmSnafu, MissingRealmSnafu, MissingTokenSnafu, RegistryError,
    RequestSnafu, TokenRequestSnafu,
};
use crate::config::Credentials;
use crate::types::DEFAULT_DOMAIN;

/// Host that actually serves Docker Hub's registry API.
pub const DOCKER_HUB_REGISTRY_HOST: &str = "registry-1.docker.io";

const DOCKER_HUB_ALIASES: [&str; 4] = [
    DEFAULT_DOMAIN,
    "index.docker.io",
    DOCKER_HUB_REGISTRY_HOST,
    "https://index.docker.io/v1/",
];

const USER_AGENT: &str = concat!("cnab-oci/", env!("CARGO_PKG_VERSION"));

/// How a registry host is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Https,
    /// TLS with certificate verification disabled.
    HttpsSkipVerify,
    Http,
}

impl Transport {
    fn scheme(self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Https | Transport::HttpsSkipVerify => "https",
        }
    }
}

pub(crate) struct RegistryClient {
    client: Client,
    skip_verify_client: Client,
    skip_verify: HashSet<String>,
    plain_http: HashSet<String>,
    credentials: HashMap<String, Credentials>,
    tokens: TokenCache,
}

impl RegistryClient {
    pub fn new(
        timeout: Duration,
        credentials: HashMap<String, Credentials>,
    ) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context(BuildClientSnafu)?;
        let skip_verify_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .context(BuildClientSnafu)?;
        Ok(Self {
            client,
            skip_verify_client,
            skip_verify: HashSet::new(),
            plain_http: HashSet::new(),
            credentials,
            tokens: TokenCache::default(),
        })
    }

    /// Decide how each insecure registry is reached: TLS with a bad certificate
    /// if it answers HTTPS at all, plain HTTP otherwise.
    pub async fn probe_insecure(&mut self, registries: &[String]) {
        for registry in registries {
            let url = format!("https://{}/v2/", api_host(registry));
            match self.skip_verify_client.get(&url).send().await {
                Ok(_) => {
                    tracing::debug!(registry = %registry, "insecure registry answers HTTPS, skipping TLS verification");
                    self.skip_verify.insert(registry.clone());
                }
                Err(e) => {
                    tracing::debug!(registry = %registry, error = %e, "insecure registry uses plain HTTP");
                    self.plain_http.insert(registry.clone());
                }
            }
        }
    }

    pub fn transport(&self, domain: &str) -> Transport {
        if self.skip_verify.contains(domain) {
            Transport::HttpsSkipVerify
        } else if self.plain_http.contains(domain) || is_loopback(domain) {
            Transport::Http
        } else {
            Transport::Https
        }
    }

    /// Base URL of the distribution API for `domain`, e.g. `https://ghcr.io/v2`.
    pub fn base_url(&self, domain: &str) -> String {
        format!("{}://{}/v2", self.transport(domain).scheme(), api_host(domain))
    }

    fn http(&self, domain: &str) -> &Client {
        match self.transport(domain) {
            Transport::HttpsSkipVerify => &self.skip_verify_client,
            Transport::Https | Transport::Http => &self.client,
        }
    }

    fn credentials_for(&self, domain: &str) -> Option<&Credentials> {
        if let Some(c) = self.credentials.get(domain) {
            return Some(c);
        }
        if DOCKER_HUB_ALIASES.contains(&domain) {
            return DOCKER_HUB_ALIASES
                .iter()
                .find_map(|alias| self.credentials.get(*alias));
        }
        None
    }

    /// Send a replayable request, answering one authentication challenge.
    pub async fn send<F>(
        &self,
        domain: &str,
        scope: &Scope,
        method: Method,
        url: &str,
        decorate: F,
    ) -> Result<Response, RegistryError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let build = || {
            let request = decorate(self.http(domain).request(method.clone(), url));
            match self.tokens.get(domain, scope) {
                Some(auth) => auth.apply(request),
                None => request,
            }
        };

        let response = build().send().await.context(RequestSnafu { url })?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge);
        let Some(challenge) = challenge else {
            return Ok(response);
        };
        if !self.authorize(domain, scope, url, challenge).await? {
            return Ok(response);
        }

        build().send().await.context(RequestSnafu { url })
    }

    /// Send a request with a streamed body using whatever authorization is cached.
    pub async fn send_streamed<F>(
        &self,
        domain: &str,
        scope: &Scope,
        method: Method,
        url: &str,
        body: Body,
        decorate: F,
    ) -> Result<Response, RegistryError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let mut request = decorate(self.http(domain).request(method, url)).body(body);
        if let Some(auth) = self.tokens.get(domain, scope) {
            request = auth.apply(request);
        }
        request.send().await.context(RequestSnafu { url })
    }

    /// Obtain and cache an authorization for `challenge`.
    ///
    /// Returns false when there is nothing to answer it with.
    async fn authorize(
        &self,
        domain: &str,
        scope: &Scope,
        url: &str,
        challenge: Challenge,
    ) -> Result<bool, RegistryError> {
        let credentials = self.credentials_for(domain);
        match challenge {
            Challenge::Basic => {
                let Some(credentials) = credentials else {
                    return Ok(false);
                };
                let auth = Authorization::Basic(credentials.clone());
                self.tokens.insert(domain, scope, auth, None);
                Ok(true)
            }
            Challenge::Bearer {
                realm,
                service,
                scope: challenge_scope,
            } => {
                let realm = realm.context(MissingRealmSnafu { url })?;
                let mut token_url = reqwest::Url::parse(&realm)
                    .ok()
                    .context(InvalidRealmSnafu { realm: &realm })?;
                {
                    let mut query = token_url.query_pairs_mut();
                    if let Some(service) = &service {
                        query.append_pair("service", service);
                    }
                    for s in scope.with_challenge(challenge_scope.as_deref()) {
                        query.append_pair("scope", &s);
                    }
                }

                let mut request = self.http(domain).get(token_url);
                if let Some(c) = credentials {
                    request = request.basic_auth(&c.username, Some(&c.password));
                }
                let response = request.send().await.context(RequestSnafu { url: &realm })?;
                if !response.status().is_success() {
                    return TokenRequestSnafu {
                        realm,
                        status: response.status(),
                    }
                    .fail();
                }
                let token: TokenResponse =
                    response.json().await.context(RequestSnafu { url: &realm })?;
                let (token, ttl) = token
                    .into_token()
                    .context(MissingTokenSnafu { realm: &realm })?;

                tracing::debug!(registry = %domain, realm = %realm, "obtained bearer token");
                self.tokens
                    .insert(domain, scope, Authorization::Bearer(token), Some(ttl));
                Ok(true)
            }
        }
    }
}

/// Docker Hub is addressed as `docker.io` but served elsewhere.
fn api_host(domain: &str) -> &str {
    if domain == DEFAULT_DOMAIN {
        DOCKER_HUB_REGISTRY_HOST
    } else {
        domain
    }
}

fn is_loopback(domain: &str) -> bool {
    let host = match domain.strip_prefix('[') {
        Some(rest) => rest.split_once(']').map_or(rest, |(host, _)| host),
        None => domain.rsplit_once(':').map_or(domain, |(host, _)| host),
    };
    host == "localhost" || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
