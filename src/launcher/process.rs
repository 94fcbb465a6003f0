//! Bare process launch

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::common::{Error, Result};

use super::{ProcessSpec, Target};

/// Spawn `spec` with all three standard streams piped
pub(super) fn spawn(spec: &ProcessSpec) -> Result<Target> {
    let program = resolve_program(&spec.program)?;

    let mut cmd = Command::new(&program);
    cmd.args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let child = cmd.spawn().map_err(|e| {
        Error::Launch(format!("Failed to start {}: {}", program.display(), e))
    })?;

    Target::from_child(child, spec.label())
}

/// Resolve a bare program name through PATH
///
/// Anything with a directory component is used as given so that it stays
/// relative to the target's working directory.
pub(super) fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }

    which::which(program).map_err(|_| Error::target_not_found(program))
}
