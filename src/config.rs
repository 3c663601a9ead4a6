//! Host endpoint configuration.
//!
//! A [`HostConfig`] is built once at plugin startup and handed to
//! [`HostClient::connect`](crate::rpc::HostClient::connect). Nothing in the
//! crate reads the host location from process-wide state.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::rpc::CallTimeout;

/// Well-known Unix socket the host listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/autMan.sock";
/// Path prefix for calls made over the Unix socket.
pub const SOCKET_PATH_PREFIX: &str = "/sock";
/// Path prefix for calls made over loopback TCP.
pub const LOOPBACK_PATH_PREFIX: &str = "/otto";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HostDefaults;

impl HostDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// Added on top of a blocking call's logical timeout so the host always
    /// answers before the network deadline does.
    pub const BLOCKING_GRACE: Duration = Duration::from_secs(2);
}

/// Where the host can be reached.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostEndpoint {
    /// HTTP over a Unix domain socket, JSON bodies and envelope replies.
    Socket(PathBuf),
    /// HTTP over `127.0.0.1:<port>`, query-string parameters and raw replies.
    Loopback { port: u16 },
}

/// Immutable host configuration.
#[derive(Clone, Debug)]
pub struct HostConfig {
    pub endpoint: HostEndpoint,
    pub path_prefix: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub blocking_grace: Duration,
}

impl HostConfig {
    /// Targets the host's well-known Unix socket.
    pub fn socket() -> Self {
        Self::socket_at(DEFAULT_SOCKET_PATH)
    }

    /// Targets a Unix socket at an explicit path.
    pub fn socket_at(path: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: HostEndpoint::Socket(path.into()),
            path_prefix: SOCKET_PATH_PREFIX.to_string(),
            connect_timeout: HostDefaults::CONNECT_TIMEOUT,
            request_timeout: HostDefaults::REQUEST_TIMEOUT,
            blocking_grace: HostDefaults::BLOCKING_GRACE,
        }
    }

    /// Targets the host over loopback TCP.
    pub fn loopback(port: u16) -> Self {
        Self {
            endpoint: HostEndpoint::Loopback { port },
            path_prefix: LOOPBACK_PATH_PREFIX.to_string(),
            connect_timeout: HostDefaults::CONNECT_TIMEOUT,
            request_timeout: HostDefaults::REQUEST_TIMEOUT,
            blocking_grace: HostDefaults::BLOCKING_GRACE,
        }
    }

    /// Overrides the path prefix placed in front of every method path.
    ///
    /// Trailing slashes are dropped so `"/otto/"` and `"/otto"` behave the same.
    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.path_prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_blocking_grace(mut self, grace: Duration) -> Self {
        self.blocking_grace = grace;
        self
    }

    /// Network deadline for a call.
    ///
    /// Blocking calls never get a deadline shorter than their logical timeout.
    pub fn deadline_for(&self, timeout: CallTimeout) -> Duration {
        match timeout {
            CallTimeout::Default => self.request_timeout,
            CallTimeout::Blocking(logical) => logical.saturating_add(self.blocking_grace),
        }
    }

    /// Full request path for a host method, e.g. `/otto/bucketGet`.
    pub fn method_path(&self, method: &str) -> String {
        format!("{}/{}", self.path_prefix, method.trim_start_matches('/'))
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::socket()
    }
}

/// Startup arguments the host passes to every plugin process.
///
/// The host launches plugins as `<plugin> <port> <sender-id>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PluginArgs {
    pub port: u16,
    pub sender_id: String,
}

impl PluginArgs {
    /// Reads the arguments of the current process.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_args(std::env::args())
    }

    /// Parses an argument list whose first element is the program name.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().skip(1).map(Into::into);

        let raw_port = args.next().ok_or(ConfigError::MissingArgument("port"))?;
        let port = raw_port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(raw_port.clone()))?;
        let sender_id = args
            .next()
            .ok_or(ConfigError::MissingArgument("sender id"))?;

        Ok(Self { port, sender_id })
    }

    /// Loopback configuration pointing at the port the host supplied.
    pub fn loopback_config(&self) -> HostConfig {
        HostConfig::loopback(self.port)
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    #[error("missing plugin argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid host port argument: {0:?}")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::rpc::CallTimeout;

    use super::{
        ConfigError, HostConfig, HostEndpoint, PluginArgs, DEFAULT_SOCKET_PATH,
        LOOPBACK_PATH_PREFIX, SOCKET_PATH_PREFIX,
    };

    #[test]
    fn default_config_targets_well_known_socket() {
        let config = HostConfig::default();
        assert_eq!(
            config.endpoint,
            HostEndpoint::Socket(PathBuf::from(DEFAULT_SOCKET_PATH))
        );
        assert_eq!(config.path_prefix, SOCKET_PATH_PREFIX);
        assert_eq!(config.method_path("get"), "/sock/get");
    }

    #[test]
    fn loopback_config_uses_otto_prefix() {
        let config = HostConfig::loopback(8080);
        assert_eq!(config.endpoint, HostEndpoint::Loopback { port: 8080 });
        assert_eq!(config.path_prefix, LOOPBACK_PATH_PREFIX);
        assert_eq!(config.method_path("/msghook"), "/otto/msghook");
    }

    #[test]
    fn path_prefix_override_drops_trailing_slash() {
        let config = HostConfig::loopback(1).with_path_prefix("/custom/");
        assert_eq!(config.method_path("listen"), "/custom/listen");
    }

    #[test]
    fn blocking_deadline_never_undercuts_logical_timeout() {
        let config = HostConfig::loopback(1).with_request_timeout(Duration::from_millis(50));
        let logical = Duration::from_secs(30);
        assert!(config.deadline_for(CallTimeout::Blocking(logical)) >= logical);
        assert_eq!(
            config.deadline_for(CallTimeout::Default),
            Duration::from_millis(50)
        );

        let no_grace = config.with_blocking_grace(Duration::ZERO);
        assert_eq!(no_grace.deadline_for(CallTimeout::Blocking(logical)), logical);
    }

    #[test]
    fn plugin_args_read_port_and_sender() {
        let args = PluginArgs::from_args(["plugin", "9090", "sender-7"]).expect("parse args");
        assert_eq!(args.port, 9090);
        assert_eq!(args.sender_id, "sender-7");
        assert_eq!(
            args.loopback_config().endpoint,
            HostEndpoint::Loopback { port: 9090 }
        );
    }

    #[test]
    fn plugin_args_reject_missing_sender() {
        let error = PluginArgs::from_args(["plugin", "9090"]).expect_err("sender is required");
        assert_eq!(error, ConfigError::MissingArgument("sender id"));
    }

    #[test]
    fn plugin_args_reject_non_numeric_port() {
        let error = PluginArgs::from_args(["plugin", "http", "s"]).expect_err("bad port");
        assert_eq!(error, ConfigError::InvalidPort("http".to_string()));
    }
}
