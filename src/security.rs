#![forbid(unsafe_code)]

//! Startup guard shared by the backend binary.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when the process is started as root. The backend only needs to
/// bind a port and talk to the network, so a regular user account is enough.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; use a regular user or a service account");
    }
    Ok(())
}
