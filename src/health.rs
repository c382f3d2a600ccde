//! Container health marker.
//!
//! Inside a Docker container (detected by `/.dockerenv`) the relay writes a
//! `.running` file at startup so a `HEALTHCHECK` can test for it. Failing to
//! write it is logged; the relay keeps working.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// File whose presence marks a Docker container
pub const DOCKER_ENV_FILE: &str = "/.dockerenv";

/// Marker file written when running in a container
pub const RUNNING_MARKER: &str = ".running";

/// Write the running marker if inside a container. Returns the marker path
/// when one was written.
pub fn mark_running() -> Option<PathBuf> {
    mark_running_in(Path::new(DOCKER_ENV_FILE), Path::new(RUNNING_MARKER))
}

fn mark_running_in(docker_env: &Path, marker: &Path) -> Option<PathBuf> {
    if !docker_env.exists() {
        return None;
    }

    match touch(marker) {
        Ok(()) => {
            info!(path = %marker.display(), "Created running marker");
            Some(marker.to_path_buf())
        }
        Err(e) => {
            error!(
                path = %marker.display(),
                error = %e,
                "Failed to create running marker; container will report unhealthy"
            );
            None
        }
    }
}

fn touch(path: &Path) -> io::Result<()> {
    File::create(path).map(|_| ())
}
