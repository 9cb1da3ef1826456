// src/models/server.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 25565;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    EmptyHost,
    InvalidPort(String),
    Malformed(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyHost => write!(f, "Server address is missing a host"),
            Self::InvalidPort(port) => write!(f, "Invalid port: {}", port),
            Self::Malformed(addr) => write!(f, "Malformed server address: {}", addr),
        }
    }
}

impl std::error::Error for AddressError {}

/// A validated `host:port` pair. The host is lowercased so that
/// `MC.example.com` and `mc.example.com` share one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AddressError::EmptyHost);
        }
        if input.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/') {
            return Err(AddressError::Malformed(input.to_string()));
        }

        let (host, port) = match input.rsplit_once(':') {
            Some((host, port)) => {
                if host.contains(':') {
                    return Err(AddressError::Malformed(input.to_string()));
                }
                let port = match port.parse::<u16>() {
                    Ok(0) | Err(_) => return Err(AddressError::InvalidPort(port.to_string())),
                    Ok(p) => p,
                };
                (host, port)
            }
            None => (input, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(AddressError::EmptyHost);
        }
        if host.len() > 253 {
            return Err(AddressError::Malformed(input.to_string()));
        }

        Ok(Self {
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    /// Builds an address from the `ip` and optional `port` query parameters.
    pub fn from_parts(host: &str, port: Option<&str>) -> Result<Self, AddressError> {
        match port {
            Some(port) if !port.is_empty() => Self::parse(&format!("{}:{}", host.trim(), port.trim())),
            _ => Self::parse(host),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Status,
    Query,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::Status, Kind::Query];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Status => "status",
            Kind::Query => "query",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Players {
    pub max: i32,
    pub now: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerVersion {
    pub name: String,
    pub protocol: i32,
}

/// What a status probe reports before it is stamped into a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusResult {
    pub motd: String,
    pub favicon: Option<String>,
    pub players: Players,
    pub version: ServerVersion,
}

/// What a query probe reports before it is stamped into a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub motd: String,
    pub version: String,
    pub game_type: String,
    pub game_id: String,
    pub map: String,
    pub server_mod: String,
    pub plugins: Vec<String>,
    pub players: Players,
    pub player_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub status: ProbeState,
    pub online: bool,
    pub motd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    pub error: Option<String>,
    pub players: Players,
    pub server: ServerVersion,
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerQuery {
    pub status: ProbeState,
    pub online: bool,
    pub motd: String,
    pub version: String,
    pub game_type: String,
    pub game_id: String,
    pub map: String,
    pub server_mod: String,
    pub plugins: Vec<String>,
    pub players: QueryPlayers,
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryPlayers {
    pub max: i32,
    pub now: i32,
    pub list: Vec<String>,
}

/// Latest probe outcome cached for one address and kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    Status(ServerStatus),
    Query(ServerQuery),
}

impl Snapshot {
    pub fn status(result: StatusResult, took: Duration) -> Self {
        Snapshot::Status(ServerStatus {
            status: ProbeState::Success,
            online: true,
            motd: result.motd,
            favicon: result.favicon,
            error: None,
            players: result.players,
            server: result.version,
            last_updated: Utc::now(),
            duration_ms: took.as_millis() as u64,
        })
    }

    pub fn query(result: QueryResult, took: Duration) -> Self {
        Snapshot::Query(ServerQuery {
            status: ProbeState::Success,
            online: true,
            motd: result.motd,
            version: result.version,
            game_type: result.game_type,
            game_id: result.game_id,
            map: result.map,
            server_mod: result.server_mod,
            plugins: result.plugins,
            players: QueryPlayers {
                max: result.players.max,
                now: result.players.now,
                list: result.player_list,
            },
            error: None,
            last_updated: Utc::now(),
            duration_ms: took.as_millis() as u64,
        })
    }

    /// Snapshot recorded when a probe completed but could not reach the server.
    pub fn failed(kind: Kind, error: String) -> Self {
        let now = Utc::now();
        match kind {
            Kind::Status => Snapshot::Status(ServerStatus {
                status: ProbeState::Error,
                online: false,
                motd: String::new(),
                favicon: None,
                error: Some(error),
                players: Players::default(),
                server: ServerVersion::default(),
                last_updated: now,
                duration_ms: 0,
            }),
            Kind::Query => Snapshot::Query(ServerQuery {
                status: ProbeState::Error,
                online: false,
                motd: String::new(),
                version: String::new(),
                game_type: String::new(),
                game_id: String::new(),
                map: String::new(),
                server_mod: String::new(),
                plugins: Vec::new(),
                players: QueryPlayers::default(),
                error: Some(error),
                last_updated: now,
                duration_ms: 0,
            }),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Snapshot::Status(_) => Kind::Status,
            Snapshot::Query(_) => Kind::Query,
        }
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        match self {
            Snapshot::Status(s) => s.last_updated,
            Snapshot::Query(q) => q.last_updated,
        }
    }

    pub fn is_online(&self) -> bool {
        match self {
            Snapshot::Status(s) => s.online,
            Snapshot::Query(q) => q.online,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_port() {
        let addr = ServerAddress::parse("Play.Example.com").unwrap();
        assert_eq!(addr.host(), "play.example.com");
        assert_eq!(addr.port(), DEFAULT_PORT);
        assert_eq!(addr.to_string(), "play.example.com:25565");
    }

    #[test]
    fn parse_explicit_port() {
        let addr = ServerAddress::parse("mc1:25566").unwrap();
        assert_eq!(addr.host(), "mc1");
        assert_eq!(addr.port(), 25566);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(ServerAddress::parse(""), Err(AddressError::EmptyHost));
        assert_eq!(ServerAddress::parse(":25565"), Err(AddressError::EmptyHost));
        assert!(matches!(
            ServerAddress::parse("mc1:0"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            ServerAddress::parse("mc1:99999"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            ServerAddress::parse("a:b:25565"),
            Err(AddressError::Malformed(_))
        ));
        assert!(matches!(
            ServerAddress::parse("mc 1:25565"),
            Err(AddressError::Malformed(_))
        ));
    }

    #[test]
    fn from_parts_appends_port() {
        let addr = ServerAddress::from_parts("mc1", Some("25570")).unwrap();
        assert_eq!(addr.to_string(), "mc1:25570");
        let addr = ServerAddress::from_parts("mc1:25571", Some("")).unwrap();
        assert_eq!(addr.port(), 25571);
    }

    #[test]
    fn query_snapshot_carries_server_mod() {
        let snapshot = Snapshot::query(
            QueryResult {
                server_mod: "Paper on 1.20.4".into(),
                plugins: vec!["WorldEdit 7.2".into()],
                ..Default::default()
            },
            Duration::from_millis(8),
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["server_mod"], "Paper on 1.20.4");
        assert_eq!(json["plugins"][0], "WorldEdit 7.2");
        assert_eq!(json["duration"], 8);
    }

    #[test]
    fn failed_snapshot_is_offline() {
        let snapshot = Snapshot::failed(Kind::Query, "connection refused".into());
        assert_eq!(snapshot.kind(), Kind::Query);
        assert!(!snapshot.is_online());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "connection refused");
    }
}
