use parking_lot::RwLock;
use std::fmt;
use wiretap_store::SocketEndpoint;

use crate::status::ConnectionStatus;

/// Key of a fault rule; `None` fields match anything.
pub trait Pattern: Clone + PartialEq {
    type Target: ?Sized;

    fn matches(&self, target: &Self::Target) -> bool;

    /// Pattern matching exactly `target`, used when an endpoint is discovered.
    fn exact(target: &Self::Target) -> Self;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SocketPattern {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl SocketPattern {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
        }
    }

    pub fn host<H: Into<String>>(host: H) -> Self {
        Self {
            host: Some(host.into()),
            port: None,
        }
    }

    pub fn port(port: u16) -> Self {
        Self {
            host: None,
            port: Some(port),
        }
    }

    pub fn any() -> Self {
        Self::default()
    }
}

impl Pattern for SocketPattern {
    type Target = SocketEndpoint;

    fn matches(&self, target: &SocketEndpoint) -> bool {
        self.host.as_deref().map_or(true, |host| target.is_host(host))
            && self.port.map_or(true, |port| port == target.port)
    }

    fn exact(target: &SocketEndpoint) -> Self {
        Self::new(target.host.to_string(), target.port)
    }
}

impl fmt::Display for SocketPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.host.as_deref().unwrap_or("*");

        match self.port {
            Some(port) => write!(f, "{host}:{port}"),
            None => write!(f, "{host}:*"),
        }
    }
}

/// A database connection target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataSource {
    pub url: String,
    pub user: String,
}

impl DataSource {
    pub fn new<U: Into<String>, N: Into<String>>(url: U, user: N) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DataSourcePattern {
    pub url: Option<String>,
    pub user: Option<String>,
}

impl DataSourcePattern {
    pub fn new<U: Into<String>, N: Into<String>>(url: U, user: N) -> Self {
        Self {
            url: Some(url.into()),
            user: Some(user.into()),
        }
    }

    pub fn url<U: Into<String>>(url: U) -> Self {
        Self {
            url: Some(url.into()),
            user: None,
        }
    }

    pub fn any() -> Self {
        Self::default()
    }
}

impl Pattern for DataSourcePattern {
    type Target = DataSource;

    fn matches(&self, target: &DataSource) -> bool {
        self.url.as_deref().map_or(true, |url| url == target.url)
            && self.user.as_deref().map_or(true, |user| user == target.user)
    }

    fn exact(target: &DataSource) -> Self {
        Self::new(target.url.clone(), target.user.clone())
    }
}

impl fmt::Display for DataSourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.user.as_deref().unwrap_or("*"),
            self.url.as_deref().unwrap_or("*")
        )
    }
}

/// Outcome of resolving a target against a rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Matched(ConnectionStatus),
    Registered,
    Known,
}

#[derive(Debug)]
pub(crate) struct Rules<P> {
    rules: RwLock<Vec<(P, ConnectionStatus)>>,
}

impl<P> Default for Rules<P> {
    fn default() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }
}

impl<P: Pattern> Rules<P> {
    /// Updates the rule in place or appends it.
    pub(crate) fn set(&self, pattern: P, status: ConnectionStatus) {
        let mut rules = self.rules.write();

        match rules.iter_mut().find(|(existing, _)| *existing == pattern) {
            Some((_, existing)) => *existing = status,
            None => rules.push((pattern, status)),
        }
    }

    /// First rule, in insertion order, that matches and is not open.
    pub(crate) fn find(&self, target: &P::Target) -> Option<ConnectionStatus> {
        find(&self.rules.read(), target)
    }

    /// Like [`find`](Self::find), registering `target` as open when nothing matched.
    pub(crate) fn resolve(&self, target: &P::Target) -> Resolution {
        if let Some(status) = self.find(target) {
            return Resolution::Matched(status);
        }

        let mut rules = self.rules.write();

        if let Some(status) = find(&rules, target) {
            return Resolution::Matched(status);
        }

        let exact = P::exact(target);

        match rules.iter_mut().find(|(existing, _)| *existing == exact) {
            Some((_, status)) if *status == ConnectionStatus::Open => Resolution::Known,
            Some((_, status)) => {
                *status = ConnectionStatus::Open;
                Resolution::Registered
            }
            None => {
                rules.push((exact, ConnectionStatus::Open));
                Resolution::Registered
            }
        }
    }

    pub(crate) fn all(&self) -> Vec<(P, ConnectionStatus)> {
        self.rules.read().clone()
    }

    pub(crate) fn clear(&self) {
        self.rules.write().clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

fn find<P: Pattern>(
    rules: &[(P, ConnectionStatus)],
    target: &P::Target,
) -> Option<ConnectionStatus> {
    rules
        .iter()
        .find(|(pattern, status)| !status.is_open() && pattern.matches(target))
        .map(|(_, status)| *status)
}

/// Ordered fault rules for sockets and data sources.
///
/// The registry owns one global table; [`FaultRegistry::scope`](crate::FaultRegistry::scope)
/// hands out private ones that callers carry alongside their execution context.
#[derive(Debug, Default)]
pub struct FaultTable {
    pub(crate) sockets: Rules<SocketPattern>,
    pub(crate) data_sources: Rules<DataSourcePattern>,
}

impl FaultTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_socket_status(&self, pattern: SocketPattern, status: ConnectionStatus) {
        self.sockets.set(pattern, status);
    }

    pub fn set_data_source_status(&self, pattern: DataSourcePattern, status: ConnectionStatus) {
        self.data_sources.set(pattern, status);
    }

    pub fn find_socket(&self, endpoint: &SocketEndpoint) -> Option<ConnectionStatus> {
        self.sockets.find(endpoint)
    }

    pub fn find_data_source(&self, data_source: &DataSource) -> Option<ConnectionStatus> {
        self.data_sources.find(data_source)
    }

    pub fn sockets(&self) -> Vec<(SocketPattern, ConnectionStatus)> {
        self.sockets.all()
    }

    pub fn data_sources(&self) -> Vec<(DataSourcePattern, ConnectionStatus)> {
        self.data_sources.all()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty() && self.data_sources.is_empty()
    }

    pub fn clear(&self) {
        self.sockets.clear();
        self.data_sources.clear();
    }
}
