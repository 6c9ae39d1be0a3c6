use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct ServerConfig {
    pub ws_port: u16,
    pub debug_port: Option<u16>,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub max_participants: usize,
    pub max_room_id_len: usize,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            ws_port: env::var("WS_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            debug_port: env::var("DEBUG_PORT").ok().and_then(|p| p.parse().ok()),
            heartbeat_interval: Duration::from_secs(
                env::var("HEARTBEAT_INTERVAL_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            ),
            client_timeout: Duration::from_secs(
                env::var("CLIENT_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),
            max_participants: env::var("MAX_PARTICIPANTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            max_room_id_len: 128,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            debug_port: None,
            heartbeat_interval: Duration::from_secs(10),
            client_timeout: Duration::from_secs(30),
            max_participants: 10,
            max_room_id_len: 128,
        }
    }
}

#[derive(Clone)]
pub struct CoordinatorConfig {
    pub stun_server: String,
    pub stun_port: u16,
    pub join_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        Self {
            stun_server: env::var("STUN_SERVER")
                .unwrap_or_else(|_| "stun.l.google.com".to_string()),
            stun_port: env::var("STUN_PORT")
                .unwrap_or_else(|_| "19302".to_string())
                .parse()
                .unwrap_or(19302),
            join_timeout: Duration::from_secs(
                env::var("JOIN_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            ),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stun_server: "stun.l.google.com".to_string(),
            stun_port: 19302,
            join_timeout: Duration::from_secs(10),
        }
    }
}
