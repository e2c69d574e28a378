use serde::{de, Deserialize, Deserializer, Serialize};

use crate::status::ConnectionStatus;

/// Persisted layout of the registry, owned by an external storage collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub persistent: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sockets: Vec<SocketEntry>,

    #[serde(default, rename = "dataSources", skip_serializing_if = "Vec::is_empty")]
    pub data_sources: Vec<DataSourceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Written as a number; read from a number or a numeric string.
    #[serde(
        default,
        deserialize_with = "port_from_number_or_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub port: Option<u16>,

    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, rename = "userName", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    pub status: ConnectionStatus,
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Number(port)) => Ok(Some(port)),
        Some(Port::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid port `{text}`"))),
    }
}
