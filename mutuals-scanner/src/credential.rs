//! Credential sources.
//!
//! How a session token is obtained is deliberately opaque to the rest of the
//! workspace: anything implementing [`CredentialProvider`] can hand the crawl
//! a [`Credential`]. The providers here cover the common non-browser cases
//! (a literal value, an environment variable, a token file) and chain them.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Tokens are long base64-ish strings; anything this short is not one.
const MIN_TOKEN_LEN: usize = 31;

/// Environment variable read by [`EnvToken::default`].
pub const TOKEN_ENV_VAR: &str = "MUTUALS_TOKEN";

/// An opaque session token. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Validates a raw token value, stripping surrounding quotes the way
    /// browser storage serialises it.
    pub fn parse(raw: &str) -> Option<Self> {
        let token = raw.trim().replace('"', "");
        if looks_like_token(&token) {
            Some(Self(token))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({} chars)", self.0.len())
    }
}

fn looks_like_token(value: &str) -> bool {
    value.len() >= MIN_TOKEN_LEN && !value.chars().any(char::is_whitespace)
}

pub trait CredentialProvider: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    fn extract(&self) -> Option<Credential>;
}

/// A token supplied directly, e.g. on the command line.
pub struct StaticToken {
    raw: String,
}

impl StaticToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

impl CredentialProvider for StaticToken {
    fn name(&self) -> &str {
        "static"
    }

    fn extract(&self) -> Option<Credential> {
        Credential::parse(&self.raw)
    }
}

pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvToken {
    fn default() -> Self {
        Self::new(TOKEN_ENV_VAR)
    }
}

impl CredentialProvider for EnvToken {
    fn name(&self) -> &str {
        "environment"
    }

    fn extract(&self) -> Option<Credential> {
        std::env::var(&self.var)
            .ok()
            .and_then(|raw| Credential::parse(&raw))
    }
}

/// Reads the first non-empty line of a file.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for TokenFile {
    fn name(&self) -> &str {
        "token file"
    }

    fn extract(&self) -> Option<Credential> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Could not read token file {}: {}", self.path.display(), e);
                return None;
            }
        };
        content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .and_then(Credential::parse)
    }
}

/// Tries each provider in order and returns the first plausible token.
#[derive(Default)]
pub struct ChainedProvider {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl ChainedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl CredentialProvider for ChainedProvider {
    fn name(&self) -> &str {
        "chain"
    }

    fn extract(&self) -> Option<Credential> {
        for provider in &self.providers {
            match provider.extract() {
                Some(credential) => {
                    debug!(
                        "Token from {}, length: {}",
                        provider.name(),
                        credential.len()
                    );
                    return Some(credential);
                }
                None => debug!("No token from {}", provider.name()),
            }
        }
        None
    }
}
