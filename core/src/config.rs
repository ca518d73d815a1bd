/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transport endpoint (host:port)
    pub server_addr: String,

    /// Base URL of the HTTP directory API (history, search, contacts, login)
    pub api_url: String,

    /// Connection timeout
    pub connection_timeout: Duration,

    /// Quiet period after which a typing indicator turns itself off
    pub typing_expiry: Duration,

    /// Quiet period before a search query is sent
    pub search_debounce: Duration,

    /// Drop server echoes of our own optimistic messages instead of showing both
    pub collapse_echoes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            connection_timeout: Duration::from_secs(10),
            typing_expiry: Duration::from_secs(3),
            search_debounce: Duration::from_millis(500),
            collapse_echoes: false,
        }
    }
}

impl Config {
    /// Create config from command line arguments.
    ///
    /// Flags are consumed; everything else is returned as the remaining
    /// positional arguments (the command and its operands).
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut config = Self::default();
        let mut rest = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--server" => {
                    let addr = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--server requires a host:port argument".to_string())
                    })?;
                    config.server_addr = addr.clone();
                    i += 2;
                }
                "--api" => {
                    let url = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--api requires a URL argument".to_string())
                    })?;
                    config.api_url = url.trim_end_matches('/').to_string();
                    i += 2;
                }
                "--collapse-echoes" => {
                    config.collapse_echoes = true;
                    i += 1;
                }
                flag if flag.starts_with("--") => {
                    return Err(ChatError::Config(format!(
                        "Unknown flag {}. Usage: {} [--server <host:port>] [--api <url>] [--collapse-echoes] login <email> <password>",
                        flag,
                        args.first().map(String::as_str).unwrap_or("chatsphere")
                    )));
                }
                other => {
                    rest.push(other.to_string());
                    i += 1;
                }
            }
        }

        // Env overrides (nice for scripts)
        config.apply_env();

        if config.server_addr.trim().is_empty() {
            return Err(ChatError::Config("Server address must not be empty".to_string()));
        }

        Ok((config, rest))
    }

    fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("CHATSPHERE_SERVER") {
            if !addr.trim().is_empty() {
                self.server_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("CHATSPHERE_API") {
            if !url.trim().is_empty() {
                self.api_url = url.trim_end_matches('/').to_string();
            }
        }
        if std::env::var("CHATSPHERE_COLLAPSE_ECHOES").is_ok() {
            self.collapse_echoes = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.typing_expiry, Duration::from_secs(3));
        assert_eq!(config.search_debounce, Duration::from_millis(500));
        assert!(!config.collapse_echoes);
    }

    #[test]
    fn test_flags_and_positional_args() {
        let (config, rest) = Config::from_args(&args(&[
            "chatsphere",
            "--server",
            "10.0.0.5:7000",
            "--api",
            "http://10.0.0.5:7000/",
            "login",
            "a@b.c",
            "secret",
        ]))
        .unwrap();
        assert_eq!(config.api_url, "http://10.0.0.5:7000");
        assert_eq!(rest, vec!["login", "a@b.c", "secret"]);
        if std::env::var("CHATSPHERE_SERVER").is_err() {
            assert_eq!(config.server_addr, "10.0.0.5:7000");
        }
    }

    #[test]
    fn test_missing_flag_value() {
        let err = Config::from_args(&args(&["chatsphere", "--server"])).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_unknown_flag() {
        let err = Config::from_args(&args(&["chatsphere", "--verbose"])).unwrap_err();
        assert!(err.to_string().contains("--verbose"));
    }
}
