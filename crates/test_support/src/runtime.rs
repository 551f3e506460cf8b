use anyhow::{bail, Result};
use std::{
    env,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Ensure a Docker-compatible socket is reachable for testcontainers.
///
/// `DOCKER_HOST` wins when set. Otherwise the Docker socket is tried, then a
/// Podman socket, which is exported as `DOCKER_HOST` when found.
///
/// # Errors
/// Returns an error describing why no container runtime is usable.
pub fn ensure_container_runtime() -> Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match INIT.get_or_init(detect_runtime) {
        Ok(()) => Ok(()),
        Err(message) => bail!("{message}"),
    }
}

fn detect_runtime() -> Result<(), String> {
    if let Ok(docker_host) = env::var("DOCKER_HOST") {
        return match socket_path(&docker_host) {
            Some(path) if !wait_for_socket(&path, SOCKET_WAIT_TIMEOUT) => Err(format!(
                "`DOCKER_HOST` points to `{docker_host}`, but the socket is not accepting connections"
            )),
            _ => Ok(()),
        };
    }

    if wait_for_socket(Path::new("/var/run/docker.sock"), SOCKET_WAIT_TIMEOUT) {
        return Ok(());
    }

    if let Some(path) = podman_socket() {
        if wait_for_socket(&path, SOCKET_WAIT_TIMEOUT) {
            // Set once during test setup, before any container starts.
            env::set_var("DOCKER_HOST", format!("unix://{}", path.display()));
            return Ok(());
        }
    }

    Err("No container runtime socket found. Start Docker or `podman.socket`, or set `DOCKER_HOST`.".to_string())
}

/// Local socket path named by a `DOCKER_HOST` value; `None` for TCP hosts.
fn socket_path(docker_host: &str) -> Option<PathBuf> {
    if let Some(path) = docker_host.strip_prefix("unix://") {
        return Some(PathBuf::from(path));
    }
    docker_host.starts_with('/').then(|| PathBuf::from(docker_host))
}

fn podman_socket() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        candidates.push(PathBuf::from(runtime_dir).join("podman/podman.sock"));
    }
    candidates.push(PathBuf::from("/run/podman/podman.sock"));
    candidates.into_iter().find(|path| path.exists())
}

fn wait_for_socket(path: &Path, timeout: Duration) -> bool {
    if !path.exists() {
        return false;
    }
    let started = Instant::now();
    while started.elapsed() < timeout {
        if UnixStream::connect(path).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    false
}
