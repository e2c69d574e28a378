use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

use crate::context::ExecutionContext;

/// Coarse classification of a statement by its leading keyword.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(style = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Other,
}

impl StatementKind {
    pub fn classify(sql: &str) -> Self {
        let normalized = sql.trim_start().to_lowercase();

        if normalized.starts_with("select ") || normalized.starts_with("with ") {
            Self::Select
        } else if normalized.starts_with("insert ") {
            Self::Insert
        } else if normalized.starts_with("update ") {
            Self::Update
        } else if normalized.starts_with("delete ") {
            Self::Delete
        } else if normalized.starts_with("merge ") {
            Self::Merge
        } else {
            Self::Other
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::Delete | Self::Merge
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketEndpoint {
    pub host: Arc<str>,
    pub port: u16,
    /// Sequence number of the connection; `-1` once connections are aggregated.
    pub connection_id: i32,
    /// IP address `host` resolved to, when the interception point knows it.
    pub resolved: Option<Arc<str>>,
}

impl SocketEndpoint {
    pub fn new<H: Into<Arc<str>>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connection_id: -1,
            resolved: None,
        }
    }

    pub fn connection(mut self, connection_id: i32) -> Self {
        self.connection_id = connection_id;
        self
    }

    pub fn resolved<A: Into<Arc<str>>>(mut self, address: A) -> Self {
        self.resolved = Some(address.into());
        self
    }

    /// Whether `name` is this endpoint's host or its resolved address.
    pub fn is_host(&self, name: &str) -> bool {
        *self.host == *name || self.resolved.as_deref() == Some(name)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;

        if self.connection_id >= 0 {
            write!(f, "#{}", self.connection_id)?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementEndpoint {
    pub text: Arc<str>,
    pub kind: StatementKind,
}

impl StatementEndpoint {
    pub fn parse<S: Into<Arc<str>>>(sql: S) -> Self {
        let text = sql.into();
        let kind = StatementKind::classify(&text);

        Self { text, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Socket(SocketEndpoint),
    Statement(StatementEndpoint),
}

impl Endpoint {
    pub fn socket(&self) -> Option<&SocketEndpoint> {
        match self {
            Self::Socket(socket) => Some(socket),
            _ => None,
        }
    }

    pub fn statement(&self) -> Option<&StatementEndpoint> {
        match self {
            Self::Statement(statement) => Some(statement),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(socket) => socket.fmt(f),
            Self::Statement(statement) => f.write_str(&statement.text),
        }
    }
}

impl From<SocketEndpoint> for Endpoint {
    fn from(value: SocketEndpoint) -> Self {
        Self::Socket(value)
    }
}

impl From<StatementEndpoint> for Endpoint {
    fn from(value: StatementEndpoint) -> Self {
        Self::Statement(value)
    }
}

/// Which details survive when keys are grouped for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grouping {
    pub by_connection: bool,
    pub by_call_site: bool,
    pub by_thread: bool,
}

impl Grouping {
    /// Keep every detail the store tracks.
    pub fn full() -> Self {
        Self {
            by_connection: true,
            by_call_site: true,
            by_thread: true,
        }
    }

    pub fn without_call_site() -> Self {
        Self {
            by_call_site: false,
            ..Self::full()
        }
    }

    pub fn by_endpoint() -> Self {
        Self {
            by_connection: false,
            by_call_site: false,
            by_thread: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.by_connection && self.by_call_site && self.by_thread
    }
}

impl Default for Grouping {
    fn default() -> Self {
        Self::full()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub endpoint: Endpoint,
    pub context: ExecutionContext,
}

impl RecordKey {
    pub fn new<E: Into<Endpoint>>(endpoint: E, context: ExecutionContext) -> Self {
        Self {
            endpoint: endpoint.into(),
            context,
        }
    }

    pub fn coarsen(&self, grouping: &Grouping) -> Self {
        if grouping.is_full() {
            return self.clone();
        }

        let endpoint = match &self.endpoint {
            Endpoint::Socket(socket) if !grouping.by_connection => {
                Endpoint::Socket(socket.clone().connection(-1))
            }
            endpoint => endpoint.clone(),
        };

        let mut context = self.context.clone();

        if !grouping.by_call_site {
            context.call_site = None;
        }

        if !grouping.by_thread {
            context.thread = None;
        }

        Self { endpoint, context }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallSite;

    #[test]
    fn classify_statements() {
        assert_eq!(StatementKind::classify("SELECT 1 FROM DUAL"), StatementKind::Select);
        assert_eq!(
            StatementKind::classify("  with x as (select 1) select * from x"),
            StatementKind::Select
        );
        assert_eq!(StatementKind::classify("insert into t values (1)"), StatementKind::Insert);
        assert_eq!(StatementKind::classify("Update t set a = 1"), StatementKind::Update);
        assert_eq!(StatementKind::classify("DELETE FROM t"), StatementKind::Delete);
        assert_eq!(StatementKind::classify("merge into t using s"), StatementKind::Merge);
        assert_eq!(StatementKind::classify("CREATE TABLE t (a int)"), StatementKind::Other);
        assert_eq!(StatementKind::classify("select"), StatementKind::Other);
    }

    #[test]
    fn statement_kind_display_round_trips() {
        assert_eq!(StatementKind::Merge.to_string(), "MERGE");
        assert_eq!("DELETE".parse::<StatementKind>().unwrap(), StatementKind::Delete);
        assert!(StatementKind::Update.is_mutating());
        assert!(!StatementKind::Select.is_mutating());
    }

    #[test]
    fn socket_display() {
        let socket = SocketEndpoint::new("db", 5432);
        assert_eq!(socket.to_string(), "db:5432");
        assert_eq!(socket.clone().connection(3).to_string(), "db:5432#3");
        assert_eq!(socket.address(), "db:5432");
    }

    #[test]
    fn coarsen_drops_requested_detail() {
        let context = ExecutionContext::new(
            crate::context::ThreadMeta::current(),
            Some(CallSite::new("at main")),
        );
        let key = RecordKey::new(SocketEndpoint::new("db", 5432).connection(7), context);

        let coarse = key.coarsen(&Grouping::by_endpoint());
        assert_eq!(coarse.endpoint, Endpoint::Socket(SocketEndpoint::new("db", 5432)));
        assert!(coarse.context.thread.is_none());
        assert!(coarse.context.call_site.is_none());

        let stripped = key.coarsen(&Grouping::without_call_site());
        assert_eq!(stripped.endpoint, key.endpoint);
        assert_eq!(stripped.context.thread, key.context.thread);
        assert!(stripped.context.call_site.is_none());

        assert_eq!(key.coarsen(&Grouping::full()), key);
    }
}
