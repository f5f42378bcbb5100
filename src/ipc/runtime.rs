use anyhow::{Result, anyhow};
use directories::UserDirs;
use std::{
    fs,
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
};

pub fn runtime_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    let dir = dirs.home_dir().join(".local").join("run");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Control socket.
pub fn socket_path() -> Result<PathBuf> {
    Ok(runtime_dir()?.join("aircursor.sock"))
}

/// Perception connects here and streams landmark frames.
pub fn frames_socket_path() -> Result<PathBuf> {
    Ok(runtime_dir()?.join("aircursor-frames.sock"))
}

/// Set once SIGINT or SIGTERM arrives.
pub fn termination_flag() -> Result<Arc<AtomicBool>> {
    use signal_hook::consts::{SIGINT, SIGTERM};

    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, flag.clone())?;
    signal_hook::flag::register(SIGTERM, flag.clone())?;
    Ok(flag)
}
