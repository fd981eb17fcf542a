//! SSH client for remote provisioning.
//!
//! Uses russh to execute commands on provisioned servers with streaming
//! output, exit codes, retry on connection-class failures, and file
//! read/write. One client per server; the session is cached and reopened
//! when the server drops it.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{Config, Handle};
use russh::keys::key::KeyPair;
use russh::ChannelMsg;
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use tokio::time::timeout;

use crate::errors::{Error, Result};
use crate::waiter;

/// Default per-command timeout.
const EXEC_TIMEOUT: Duration = Duration::from_secs(300);

/// Server-side sessions are dropped after this much inactivity.
const IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ── Identity ─────────────────────────────────────────

/// An ed25519 keypair in OpenSSH encoding. Either loaded from the
/// operator's configured path or generated fresh for the run.
#[derive(Clone)]
pub struct SshIdentity {
    private_openssh: String,
    public_openssh: String,
}

impl SshIdentity {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let private_openssh = std::fs::read_to_string(path)?;
        let key = PrivateKey::from_openssh(&private_openssh)
            .map_err(|e| Error::Configuration(format!("cannot parse SSH key {:?}: {}", path, e)))?;
        let public_openssh = key
            .public_key()
            .to_openssh()
            .map_err(|e| Error::Configuration(format!("cannot encode public key: {}", e)))?;
        Ok(Self {
            private_openssh,
            public_openssh,
        })
    }

    pub fn generate() -> Result<Self> {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .map_err(|e| Error::Other(format!("keygen failed: {}", e)))?;
        let private_openssh = key
            .to_openssh(LineEnding::LF)
            .map_err(|e| Error::Other(format!("key encoding failed: {}", e)))?
            .to_string();
        let public_openssh = key
            .public_key()
            .to_openssh()
            .map_err(|e| Error::Other(format!("key encoding failed: {}", e)))?;
        Ok(Self {
            private_openssh,
            public_openssh,
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_openssh
    }

    fn keypair(&self) -> Result<KeyPair> {
        russh::keys::decode_secret_key(&self.private_openssh, None)
            .map_err(|e| Error::Configuration(format!("invalid SSH private key: {}", e)))
    }
}

// ── Exec surface ─────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Combined stdout + stderr in arrival order.
    pub output: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub struct ExecOptions<'a> {
    /// Turn a non-zero exit into `Error::Command`.
    pub raise_on_error: bool,
    pub timeout: Duration,
    /// Receives whole lines as the command produces them.
    pub stream: Option<&'a (dyn Fn(&str) + Send + Sync)>,
}

impl Default for ExecOptions<'_> {
    fn default() -> Self {
        Self {
            raise_on_error: true,
            timeout: EXEC_TIMEOUT,
            stream: None,
        }
    }
}

// ── Client ───────────────────────────────────────────

struct ClientHandler;

#[async_trait::async_trait]
impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Hosts are provisioned with fresh keys this run; there is no prior
        // known-hosts entry to verify against.
        Ok(true)
    }
}

pub struct SshClient {
    host: String,
    port: u16,
    user: String,
    identity: SshIdentity,
    session: tokio::sync::Mutex<Option<Handle<ClientHandler>>>,
}

impl SshClient {
    pub fn new(host: &str, user: &str, identity: SshIdentity) -> Self {
        Self {
            host: host.to_string(),
            port: 22,
            user: user.to_string(),
            identity,
            session: tokio::sync::Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Execute with default options: raise on non-zero exit, 300s timeout.
    pub async fn execute(&self, command: &str) -> Result<ExecResult> {
        self.execute_with(command, ExecOptions::default()).await
    }

    pub async fn execute_with(&self, command: &str, opts: ExecOptions<'_>) -> Result<ExecResult> {
        let result = self.exec_inner(command, &opts).await?;
        if opts.raise_on_error && !result.success() {
            return Err(Error::Command {
                exit_code: result.exit_code,
                output: result.output,
            });
        }
        Ok(result)
    }

    /// Retry on connection-class failures only. A command that runs and
    /// exits non-zero is never retried.
    pub async fn execute_with_retry(
        &self,
        command: &str,
        retries: u32,
        backoff: Duration,
    ) -> Result<ExecResult> {
        waiter::retry(retries, backoff, || self.execute(command)).await
    }

    /// Repeatedly open a session and run a trivial command until it works.
    pub async fn wait_until_ready(&self, max_attempts: u32, interval: Duration) -> Result<()> {
        waiter::poll(
            max_attempts,
            interval,
            &format!("ssh on {}", self.host),
            || async { Ok(self.is_available().await) },
        )
        .await
    }

    pub async fn is_available(&self) -> bool {
        let opts = ExecOptions {
            timeout: Duration::from_secs(15),
            ..Default::default()
        };
        matches!(self.execute_with("true", opts).await, Ok(r) if r.success())
    }

    /// Read a remote file. `None` on any failure (missing file, connection
    /// trouble) — callers treat absence and unreadability the same.
    pub async fn read_file(&self, path: &str) -> Option<String> {
        let opts = ExecOptions {
            raise_on_error: false,
            ..Default::default()
        };
        match self
            .execute_with(&format!("cat {}", shell_quote(path)), opts)
            .await
        {
            Ok(r) if r.success() => Some(r.output),
            _ => None,
        }
    }

    /// Write a remote file through stdin, avoiding any quoting of the
    /// content itself.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let command = format!("mkdir -p $(dirname {q}) && cat > {q}", q = shell_quote(path));
        let mut guard = self.session.lock().await;
        let mut channel = self.open_channel(&mut guard).await?;
        channel.exec(true, command.as_str()).await?;
        channel.data(content.as_bytes()).await?;
        channel.eof().await?;

        let mut exit_code = -1;
        let collect = async {
            while let Some(msg) = channel.wait().await {
                if let ChannelMsg::ExitStatus { exit_status } = msg {
                    exit_code = exit_status as i32;
                }
            }
        };
        timeout(EXEC_TIMEOUT, collect)
            .await
            .map_err(|_| Error::Connection(format!("write to {} timed out", path)))?;

        if exit_code != 0 {
            return Err(Error::Command {
                exit_code,
                output: format!("failed writing {}", path),
            });
        }
        Ok(())
    }

    /// Forward `127.0.0.1:<local_port>` to `<remote_port>` on the remote
    /// host for as long as the returned guard lives. Used to push images
    /// into the cluster registry without exposing it publicly.
    pub async fn open_tunnel(&self, local_port: u16, remote_port: u16) -> Result<SshTunnel> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", local_port))
            .await
            .map_err(|e| Error::Connection(format!("cannot bind 127.0.0.1:{}: {}", local_port, e)))?;
        let handle = self.connect().await?;
        let host = self.host.clone();

        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let channel = match handle
                    .channel_open_direct_tcpip("127.0.0.1", remote_port as u32, "127.0.0.1", 0)
                    .await
                {
                    Ok(channel) => channel,
                    Err(err) => {
                        tracing::warn!("tunnel channel to {} failed: {}", host, err);
                        break;
                    }
                };
                tokio::spawn(async move {
                    let mut stream = channel.into_stream();
                    let _ = tokio::io::copy_bidirectional(&mut socket, &mut stream).await;
                });
            }
        });
        Ok(SshTunnel { task })
    }

    // ── internals ────────────────────────────────────

    async fn exec_inner(&self, command: &str, opts: &ExecOptions<'_>) -> Result<ExecResult> {
        let mut guard = self.session.lock().await;
        let mut channel = self.open_channel(&mut guard).await?;
        channel.exec(true, command).await?;

        let mut output = Vec::new();
        let mut exit_code = -1;
        let mut line_buf = String::new();

        let collect = async {
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => {
                        output.extend_from_slice(&data);
                        stream_lines(&mut line_buf, &data, opts.stream);
                    }
                    ChannelMsg::ExtendedData { data, ext: _ } => {
                        output.extend_from_slice(&data);
                        stream_lines(&mut line_buf, &data, opts.stream);
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        exit_code = exit_status as i32;
                    }
                    ChannelMsg::Eof | ChannelMsg::Close => {}
                    _ => {}
                }
            }
        };

        timeout(opts.timeout, collect).await.map_err(|_| {
            Error::Connection(format!(
                "command timed out after {}s on {}",
                opts.timeout.as_secs(),
                self.host
            ))
        })?;

        if let (Some(stream), false) = (opts.stream, line_buf.is_empty()) {
            stream(&line_buf);
        }

        Ok(ExecResult {
            output: String::from_utf8_lossy(&output).to_string(),
            exit_code,
        })
    }

    /// Open an exec channel, reusing the cached session when it is still
    /// alive and reconnecting when the server dropped it (idle timeout,
    /// reboot during provisioning).
    async fn open_channel(
        &self,
        guard: &mut Option<Handle<ClientHandler>>,
    ) -> Result<russh::Channel<russh::client::Msg>> {
        if let Some(handle) = guard.as_ref() {
            if !handle.is_closed() {
                match handle.channel_open_session().await {
                    Ok(channel) => return Ok(channel),
                    Err(err) => {
                        tracing::debug!("cached ssh session to {} is stale: {}", self.host, err);
                    }
                }
            }
            guard.take();
        }

        let handle = self.connect().await?;
        let channel = handle.channel_open_session().await?;
        *guard = Some(handle);
        Ok(channel)
    }

    async fn connect(&self) -> Result<Handle<ClientHandler>> {
        let config = Arc::new(Config {
            inactivity_timeout: Some(IDLE_TIMEOUT),
            ..Default::default()
        });
        let addr = format!("{}:{}", self.host, self.port);
        tracing::debug!("opening ssh session to {} as {}", addr, self.user);

        let mut handle = timeout(
            CONNECT_TIMEOUT,
            russh::client::connect(config, addr.clone(), ClientHandler),
        )
        .await
        .map_err(|_| Error::Connection(format!("connect to {} timed out", addr)))??;

        let authenticated = handle
            .authenticate_publickey(&self.user, Arc::new(self.identity.keypair()?))
            .await?;
        if !authenticated {
            return Err(Error::Authentication(format!(
                "public key rejected for {}@{}",
                self.user, self.host
            )));
        }

        Ok(handle)
    }
}

/// Keeps a local port forward alive; dropping it tears the listener down.
pub struct SshTunnel {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Buffer chunks and hand whole lines to the callback.
fn stream_lines(buf: &mut String, chunk: &[u8], stream: Option<&(dyn Fn(&str) + Send + Sync)>) {
    let Some(callback) = stream else {
        return;
    };
    buf.push_str(&String::from_utf8_lossy(chunk));
    while let Some(pos) = buf.find('\n') {
        let line: String = buf.drain(..=pos).collect();
        callback(line.trim_end_matches(['\n', '\r']));
    }
}

/// Single-quote a path for the remote shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_stream_lines_buffers_until_newline() {
        let lines = Mutex::new(Vec::new());
        let cb = |line: &str| lines.lock().unwrap().push(line.to_string());
        let mut buf = String::new();

        stream_lines(&mut buf, b"hel", Some(&cb));
        assert!(lines.lock().unwrap().is_empty(), "no newline yet");

        stream_lines(&mut buf, b"lo\nwor", Some(&cb));
        assert_eq!(*lines.lock().unwrap(), vec!["hello"]);

        stream_lines(&mut buf, b"ld\n", Some(&cb));
        assert_eq!(*lines.lock().unwrap(), vec!["hello", "world"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_stream_lines_handles_multiple_lines_per_chunk() {
        let lines = Mutex::new(Vec::new());
        let cb = |line: &str| lines.lock().unwrap().push(line.to_string());
        let mut buf = String::new();

        stream_lines(&mut buf, b"a\nb\nc", Some(&cb));
        assert_eq!(*lines.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(buf, "c");
    }

    #[test]
    fn test_shell_quote_wraps_and_escapes() {
        assert_eq!(shell_quote("/etc/fstab"), "'/etc/fstab'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_generated_identity_round_trips() {
        let identity = SshIdentity::generate().expect("keygen");
        assert!(
            identity.public_key().starts_with("ssh-ed25519 "),
            "unexpected public key: {}",
            identity.public_key()
        );
        identity.keypair().expect("russh should parse our own key");
    }

    #[test]
    fn test_exec_result_success() {
        let ok = ExecResult {
            output: String::new(),
            exit_code: 0,
        };
        let bad = ExecResult {
            output: String::new(),
            exit_code: 2,
        };
        assert!(ok.success());
        assert!(!bad.success());
    }
}
