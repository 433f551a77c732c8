use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the hub, sessions and listener.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Spores placed when the hub starts
    pub spore_count: usize,
    /// Outbound queue size per session; sends beyond it are dropped
    pub mailbox_capacity: usize,
    /// Pause between spore announcements streamed to a newly joined player
    pub spore_stream_delay: Duration,
    /// JSON account file; accounts live in memory when unset
    pub credentials_path: Option<PathBuf>,
    /// Move a session into the game as soon as its login succeeds
    pub join_on_login: bool,
    /// bcrypt work factor for newly registered passwords
    pub password_cost: u32,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            spore_count: 1000,
            mailbox_capacity: 256,
            spore_stream_delay: Duration::from_millis(5),
            credentials_path: None,
            join_on_login: false,
            password_cost: bcrypt::DEFAULT_COST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.mailbox_capacity, 256);
        assert_eq!(config.spore_count, 1000);
        assert!(!config.join_on_login);
        assert!(config.credentials_path.is_none());
        assert_eq!(config.password_cost, bcrypt::DEFAULT_COST);
    }
}
