use parse_display::{Display, FromStr};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Simulated state of a remote endpoint.
///
/// `Delay` is a signed number of milliseconds: a positive value slows the
/// connection down, a negative value waits for its magnitude and then
/// refuses the connection.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "UPPERCASE")]
pub enum ConnectionStatus {
    Open,
    Closed,
    #[display("{0}")]
    Delay(i32),
}

impl ConnectionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open | Self::Delay(0))
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Delay(millis) if *millis != 0 => {
                Some(Duration::from_millis(u64::from(millis.unsigned_abs())))
            }
            _ => None,
        }
    }

    pub fn refuses(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Delay(millis) => *millis < 0,
            Self::Open => false,
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl From<i32> for ConnectionStatus {
    fn from(millis: i32) -> Self {
        match millis {
            0 => Self::Open,
            millis => Self::Delay(millis),
        }
    }
}

impl Serialize for ConnectionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnectionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;

        value
            .parse()
            .map_err(|_| de::Error::custom(format!("unknown connection status `{value}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        assert_eq!(ConnectionStatus::Open.to_string(), "OPEN");
        assert_eq!(ConnectionStatus::Closed.to_string(), "CLOSED");
        assert_eq!(ConnectionStatus::Delay(-50).to_string(), "-50");

        assert_eq!("CLOSED".parse::<ConnectionStatus>().unwrap(), ConnectionStatus::Closed);
        assert_eq!("250".parse::<ConnectionStatus>().unwrap(), ConnectionStatus::Delay(250));
        assert!("HALF_OPEN".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn signed_delay_encoding() {
        let slow = ConnectionStatus::Delay(10);
        assert_eq!(slow.delay(), Some(Duration::from_millis(10)));
        assert!(!slow.refuses());

        let broken = ConnectionStatus::Delay(-10);
        assert_eq!(broken.delay(), Some(Duration::from_millis(10)));
        assert!(broken.refuses());

        assert!(ConnectionStatus::Closed.refuses());
        assert_eq!(ConnectionStatus::Closed.delay(), None);
        assert!(ConnectionStatus::from(0).is_open());
    }
}
