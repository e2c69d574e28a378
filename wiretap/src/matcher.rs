use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use std::{fmt, thread::ThreadId};
use wiretap_store::{Endpoint, ExecutionContext, StatementKind};

/// Which threads' calls are counted, relative to the thread that created a spy.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display(style = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Threads {
    Any,
    Current,
    Others,
}

impl Threads {
    pub fn matches(&self, context: &ExecutionContext, owner: ThreadId) -> bool {
        match self {
            Self::Any => true,
            Self::Current => context.is_thread(owner),
            Self::Others => !context.is_thread(owner),
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::Any => "",
            Self::Current => " current thread",
            Self::Others => " other threads",
        }
    }
}

/// Text pattern over an endpoint's address or statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Any,
    Exact(String),
    Prefix(String),
    /// `glob-match` syntax: `*`, `?`, `[..]`, `{a,b}`.
    Glob(String),
}

impl Pattern {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
            Self::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Self::Glob(glob) => glob_match::glob_match(glob, value),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Exact(value) => f.write_str(value),
            Self::Prefix(prefix) => write!(f, "{prefix}*"),
            Self::Glob(glob) => f.write_str(glob),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointMatcher {
    Any,
    /// Socket calls whose `host:port` matches. `Exact` also accepts the bare
    /// host, and the resolved address in place of the host.
    Sockets(Pattern),
    /// Statements of the given kind (`None` for every kind) whose text matches.
    Statements {
        kind: Option<StatementKind>,
        text: Pattern,
    },
}

impl EndpointMatcher {
    pub fn sockets() -> Self {
        Self::Sockets(Pattern::Any)
    }

    pub fn address<A: Into<String>>(address: A) -> Self {
        Self::Sockets(Pattern::Exact(address.into()))
    }

    pub fn statements() -> Self {
        Self::Statements {
            kind: None,
            text: Pattern::Any,
        }
    }

    pub fn kind(kind: StatementKind) -> Self {
        Self::Statements {
            kind: Some(kind),
            text: Pattern::Any,
        }
    }

    pub fn statement_kind(&self) -> Option<StatementKind> {
        match self {
            Self::Statements { kind, .. } => *kind,
            _ => None,
        }
    }

    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        match (self, endpoint) {
            (Self::Any, _) => true,
            (Self::Sockets(Pattern::Exact(expected)), Endpoint::Socket(socket)) => {
                let with_port = expected
                    .rsplit_once(':')
                    .filter(|(_, port)| port.parse::<u16>().ok() == Some(socket.port));

                match with_port {
                    Some((host, _)) => socket.is_host(host),
                    None => socket.is_host(expected),
                }
            }
            (Self::Sockets(pattern), Endpoint::Socket(socket)) => {
                pattern.matches(&socket.address())
            }
            (Self::Statements { kind, text }, Endpoint::Statement(statement)) => {
                kind.map_or(true, |kind| kind == statement.kind) && text.matches(&statement.text)
            }
            _ => false,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Any => "calls".to_owned(),
            Self::Sockets(Pattern::Any) => "socket operations".to_owned(),
            Self::Sockets(pattern) => format!("socket operations with {pattern}"),
            Self::Statements { kind, text } => {
                let mut description = match kind {
                    Some(kind) => format!("{kind} queries"),
                    None => "queries".to_owned(),
                };

                if *text != Pattern::Any {
                    description.push_str(&format!(" matching {text}"));
                }

                description
            }
        }
    }
}

impl Default for EndpointMatcher {
    fn default() -> Self {
        Self::Any
    }
}
