use anyhow::Context;
use std::net::TcpListener;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Asks the OS for a currently unused TCP port.
pub fn free_port() -> anyhow::Result<u16> {
    let listener =
        TcpListener::bind("127.0.0.1:0").context("Failed to bind to an ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Runs a bash script with extra environment variables, streaming its stdout
/// through the log. `envs` entries are `KEY=VALUE` pairs.
pub async fn run_script(script: impl AsRef<Path>, envs: &[&str]) -> anyhow::Result<()> {
    let script = script.as_ref();

    let mut command = Command::new("/bin/bash");
    command.arg(script);
    for env in envs {
        let (key, value) = env
            .split_once('=')
            .with_context(|| format!("Invalid environment entry: '{}'", env))?;
        command.env(key, value);
    }
    command.stdout(std::process::Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to start script {:?}", script))?;

    let stdout = child.stdout.take().context("Script has no stdout")?;
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        tracing::info!("bash$ {}", line);
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to await script {:?}", script))?;

    if !status.success() {
        anyhow::bail!("Script {:?} exited with {}", script, status);
    }

    Ok(())
}
