//! Launcher - hands control to the installer.

use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

use crate::error::{Result, UpdaterError};

/// Starts a cached artifact
pub trait Launcher: Send + Sync {
    fn launch(&self, path: &Path) -> Result<()>;
}

/// Spawns the artifact as an independent process and never waits for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(UpdaterError::Launch {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "artifact missing"),
            });
        }

        let mut cmd = Command::new(path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = path.parent() {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;

            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            const DETACHED_PROCESS: u32 = 0x00000008;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS);
        }

        let child = cmd.spawn().map_err(|source| UpdaterError::Launch {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Launched {} (pid {})", path.display(), child.id());
        Ok(())
    }
}
