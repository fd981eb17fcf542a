//! Installer steps composing the deploy and destroy pipelines.
//!
//! Each step exposes `run(&mut Context)` and a `LABEL`; commands wrap
//! the call in `(label, in_progress)` / `(label, done)` events and
//! propagate errors untouched.

pub mod build_image;
pub mod cleanup_images;
pub mod create_infrastructure;
pub mod deploy_manifests;
pub mod destroy;
pub mod provision_volumes;
pub mod remove_servers;
pub mod sandbox;
pub mod setup_cluster;
pub mod setup_registry;
pub mod setup_tunnel;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::errors::{Error, Result};
use crate::events::Observer;

/// Run a local command, streaming stdout+stderr lines to `on_log` under
/// `category`, failing on non-zero exit.
pub(crate) async fn run_local(
    program: &str,
    args: &[&str],
    observer: &dyn Observer,
    category: &str,
) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| Error::Other(format!("cannot spawn {}: {}", program, e)))?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();

    let mut output = String::new();
    loop {
        tokio::select! {
            line = out_lines.next_line() => match line {
                Ok(Some(line)) => {
                    observer.on_log(category, &line);
                    output.push_str(&line);
                    output.push('\n');
                }
                _ => break,
            },
            line = err_lines.next_line() => {
                if let Ok(Some(line)) = line {
                    observer.on_log(category, &line);
                    output.push_str(&line);
                    output.push('\n');
                }
            }
        }
    }
    // Drain whatever stderr still holds after stdout closed.
    while let Ok(Some(line)) = err_lines.next_line().await {
        observer.on_log(category, &line);
        output.push_str(&line);
        output.push('\n');
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Other(format!("{} did not exit: {}", program, e)))?;
    if !status.success() {
        return Err(Error::Command {
            exit_code: status.code().unwrap_or(-1),
            output,
        });
    }
    Ok(output)
}
