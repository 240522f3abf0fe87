use std::time::Duration;

use super::errors::ArgsError;

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECTION_RETRY_WAIT: Duration = Duration::from_millis(200);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_OPERATION_RETRY_WAIT: Duration = Duration::from_millis(200);

/// Timeouts shared by every driver.
///
/// Fields are private and only reachable through getters, so once a
/// `ConnectionArgsBuilder` has been consumed by `build()` the values can
/// no longer change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionArgs {
    connection_timeout: Duration,
    connection_retry_wait: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    operation_retry_wait: Duration,
}

impl Default for ConnectionArgs {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            connection_retry_wait: DEFAULT_CONNECTION_RETRY_WAIT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            operation_retry_wait: DEFAULT_OPERATION_RETRY_WAIT,
        }
    }
}

impl ConnectionArgs {
    pub fn builder() -> ConnectionArgsBuilder {
        ConnectionArgsBuilder::default()
    }

    /// Upper bound for opening one raw connection.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Pause between reconnection probes while the manager is recovering.
    pub fn connection_retry_wait(&self) -> Duration {
        self.connection_retry_wait
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Pause between attempts inside `Client::execute_closure`.
    pub fn operation_retry_wait(&self) -> Duration {
        self.operation_retry_wait
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionArgsBuilder {
    args: ConnectionArgs,
}

impl ConnectionArgsBuilder {
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.args.connection_timeout = timeout;
        self
    }

    pub fn connection_retry_wait(mut self, wait: Duration) -> Self {
        self.args.connection_retry_wait = wait;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.args.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.args.write_timeout = timeout;
        self
    }

    pub fn operation_retry_wait(mut self, wait: Duration) -> Self {
        self.args.operation_retry_wait = wait;
        self
    }

    pub fn build(self) -> ConnectionArgs {
        self.args
    }
}

/// Host, port and optional credentials of a backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into()).filter(|u| !u.is_empty());
        self.password = Some(password.into()).filter(|p| !p.is_empty());
        self
    }

    /// Builds `scheme://[user[:password]@]host:port/path`.
    pub fn to_uri(&self, driver: &'static str, scheme: &str, path: &str) -> Result<String, ArgsError> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(ArgsError::MissingHostOrPort { driver });
        }

        let userinfo = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("{}:{}@", escape_userinfo(user), escape_userinfo(pass)),
            (Some(user), None) => format!("{}@", escape_userinfo(user)),
            (None, Some(pass)) => format!(":{}@", escape_userinfo(pass)),
            (None, None) => String::new(),
        };

        Ok(format!("{scheme}://{userinfo}{}:{}/{path}", self.host, self.port))
    }
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn escape_userinfo(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                escaped.push(byte as char)
            }
            _ => escaped.push_str(&format!("%{byte:02X}")),
        }
    }
    escaped
}

/// Accepts a caller supplied URI if it carries the expected scheme.
pub(crate) fn check_uri(driver: &'static str, uri: &str, schemes: &[&str]) -> Result<(), ArgsError> {
    let valid = schemes
        .iter()
        .any(|scheme| uri.strip_prefix(scheme).is_some_and(|rest| rest.starts_with("://") && rest.len() > 3));

    if valid {
        Ok(())
    } else {
        Err(ArgsError::InvalidUri {
            driver,
            reason: format!("expected one of {schemes:?} schemes"),
        })
    }
}
