//! Detaching into the background

use nix::unistd::{fork, setsid, ForkResult};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Could not fork: {0}")]
    Fork(#[source] nix::Error),
    #[error("Could not start a new session: {0}")]
    Setsid(#[source] nix::Error),
}

/// Fork and continue in the child
///
/// The parent exits immediately with status 0 and runs no destructors,
/// so the joystick and session it shares with the child stay open.
pub fn detach() -> Result<(), DaemonError> {
    // SAFETY: the process has a single thread at this point
    match unsafe { fork() }.map_err(DaemonError::Fork)? {
        ForkResult::Parent { child } => {
            info!("Running in background as pid {}", child);
            std::process::exit(0);
        }
        ForkResult::Child => {
            setsid().map_err(DaemonError::Setsid)?;
            Ok(())
        }
    }
}
