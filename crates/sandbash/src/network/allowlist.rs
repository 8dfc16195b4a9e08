//! URL allowlist for outbound requests
//!
//! Default-deny. A URL is permitted when some allowed prefix has the same
//! scheme, host and effective port, and its path is a prefix of the URL's
//! path ending at a segment boundary.

use url::Url;

/// One parsed `scheme://host[:port][/path]` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UrlPrefix {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl UrlPrefix {
    fn parse(text: &str) -> Option<Self> {
        let url = Url::parse(text).ok()?;
        Some(Self {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_ascii_lowercase(),
            port: url.port_or_known_default(),
            path: url.path().to_string(),
        })
    }

    fn covers(&self, url: &Url) -> bool {
        if url.scheme() != self.scheme || url.port_or_known_default() != self.port {
            return false;
        }
        if !url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(&self.host))
        {
            return false;
        }
        path_within(url.path(), &self.path)
    }
}

/// `/v1` admits `/v1` and `/v1/x` but not `/v10`.
fn path_within(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix(prefix) else {
        return false;
    };
    prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/')
}

/// Set of URL prefixes scripts may reach.
#[derive(Debug, Clone, Default)]
pub struct NetworkAllowlist {
    prefixes: Vec<UrlPrefix>,
    allow_all: bool,
}

/// Outcome of [`NetworkAllowlist::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum UrlMatch {
    Allowed,
    Blocked { reason: String },
    Invalid { reason: String },
}

impl NetworkAllowlist {
    /// Empty allowlist: every URL is blocked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit every URL.
    ///
    /// This is the `dangerously_allow_full_internet_access` switch of
    /// [`SandboxOptions`](crate::SandboxOptions).
    pub fn allow_all() -> Self {
        Self {
            prefixes: Vec::new(),
            allow_all: true,
        }
    }

    /// Permit URLs under `prefix`, e.g. `https://api.example.com/v1`.
    ///
    /// Prefixes that do not parse as absolute URLs with a host never match
    /// anything and are dropped.
    pub fn allow(mut self, prefix: impl AsRef<str>) -> Self {
        if let Some(parsed) = UrlPrefix::parse(prefix.as_ref())
            && !self.prefixes.contains(&parsed)
        {
            self.prefixes.push(parsed);
        }
        self
    }

    /// Permit several prefixes at once.
    pub fn allow_many(self, prefixes: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        prefixes.into_iter().fold(self, |list, p| list.allow(p))
    }

    /// Decide whether `url` may be fetched.
    pub fn check(&self, url: &str) -> UrlMatch {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                return UrlMatch::Invalid {
                    reason: format!("{url}: {e}"),
                };
            }
        };
        if self.allow_all || self.prefixes.iter().any(|p| p.covers(&parsed)) {
            return UrlMatch::Allowed;
        }
        let reason = if self.prefixes.is_empty() {
            "network access is disabled".to_string()
        } else {
            format!("{url} is not in the allowlist")
        };
        UrlMatch::Blocked { reason }
    }

    /// Whether any URL at all can pass.
    pub fn is_enabled(&self) -> bool {
        self.allow_all || !self.prefixes.is_empty()
    }
}
