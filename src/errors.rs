use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error — unified error hierarchy for all deploy operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or inconsistent input, detected before side effects.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A provider API returned a non-2xx status.
    #[error("api error ({status}): {message}")]
    Api {
        status: u16,
        body: String,
        message: String,
    },

    /// SSH or HTTP transport failure (refused, timeout, unreachable, EOF).
    #[error("connection error: {0}")]
    Connection(String),

    /// Bad credentials, SSH or API. Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A remote command exited non-zero.
    #[error("command failed with exit code {exit_code}: {output}")]
    Command { exit_code: i32, output: String },

    /// The waiter exhausted its attempts.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Any other invariant violation.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn api(status: u16, body: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { status: 401 | 403, .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Api { status: 429, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 409, .. })
    }

    /// Transport-level failures that are worth another attempt. Everything
    /// else (auth, non-zero exit, 4xx) fails fast.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Conflict bodies that mean "the resource is already in the desired
    /// state". Provider adapters swallow these to stay idempotent; the
    /// marker substrings are provider-specific and must not leak out of
    /// the adapter that knows them.
    pub fn matches_conflict_marker(&self, markers: &[&str]) -> bool {
        match self {
            Self::Api { body, .. } => markers.iter().any(|m| body.contains(m)),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Other(format!("http error: {}", err))
        }
    }
}

impl From<russh::Error> for Error {
    // Auth rejection surfaces through authenticate_publickey returning
    // false; everything the transport raises is connection-class.
    fn from(err: russh::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Human-readable form of a duration for timeout messages.
pub fn humanize(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display_includes_status_and_message() {
        let err = Error::api(404, r#"{"error":"server not found"}"#, "server lookup failed");
        let msg = format!("{err}");
        assert!(msg.contains("404"), "Expected status in: {msg}");
        assert!(
            msg.contains("server lookup failed"),
            "Expected message in: {msg}"
        );
    }

    #[test]
    fn test_not_found_predicate() {
        assert!(Error::api(404, "", "").is_not_found());
        assert!(!Error::api(409, "", "").is_not_found());
        assert!(!Error::Connection("refused".into()).is_not_found());
    }

    #[test]
    fn test_unauthorized_covers_401_and_403() {
        assert!(Error::api(401, "", "").is_unauthorized());
        assert!(Error::api(403, "", "").is_unauthorized());
        assert!(!Error::api(404, "", "").is_unauthorized());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Connection("timed out".into()).is_transient());
        assert!(Error::api(503, "", "").is_transient());
        assert!(Error::api(429, "", "").is_transient());
        assert!(!Error::api(400, "", "").is_transient());
        assert!(!Error::Authentication("bad key".into()).is_transient());
        assert!(
            !Error::Command {
                exit_code: 1,
                output: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_conflict_marker_matching() {
        let err = Error::api(409, r#"{"code":"already_added"}"#, "conflict");
        assert!(err.matches_conflict_marker(&["already_added", "uniqueness"]));
        assert!(!err.matches_conflict_marker(&["target_already_defined"]));
        assert!(!Error::Other("x".into()).matches_conflict_marker(&["already_added"]));
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::from_secs(45)), "45s");
        assert_eq!(humanize(Duration::from_secs(180)), "3m");
        assert_eq!(humanize(Duration::from_secs(90)), "90s");
    }
}
