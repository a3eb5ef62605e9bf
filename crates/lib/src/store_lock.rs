//! Advisory locking of the store.
//!
//! Builds hold a shared lock for as long as they write into the store. `gc`
//! takes the exclusive lock, so it never deletes an entry a running build is
//! filling or about to reference.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::platform::paths::store_dir;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

/// Written by the exclusive holder so contention errors can name it.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockHolder {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub store: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "store is busy: `flint {command}` (pid {pid}) holds the lock since unix time {started_at}\n\
     if no flint process is running, remove {lock_path}"
  )]
  Busy {
    command: String,
    pid: u32,
    started_at: u64,
    lock_path: PathBuf,
  },

  #[error("store is busy\nif no flint process is running, remove {lock_path}")]
  BusyUnknown { lock_path: PathBuf },

  #[error("failed to create store directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file: {0}")]
  Open(#[source] io::Error),

  #[error("failed to record lock holder: {0}")]
  WriteHolder(#[source] io::Error),

  #[error("failed to lock store: {0}")]
  Lock(#[source] io::Error),
}

/// A held store lock. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
  file: File,
  mode: LockMode,
  lock_path: PathBuf,
}

impl StoreLock {
  /// Lock the configured store (`FLINT_STORE` or `<data>/store`).
  pub fn acquire(mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    Self::acquire_in(&store_dir(), mode, command)
  }

  /// Lock the store rooted at `store`, failing immediately on contention.
  pub fn acquire_in(store: &Path, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    std::fs::create_dir_all(store).map_err(|source| StoreLockError::CreateDir {
      path: store.to_path_buf(),
      source,
    })?;
    let lock_path = store.join(LOCK_FILENAME);

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(StoreLockError::Open)?;

    if let Err(err) = try_lock(&file, mode) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(busy_error(&lock_path));
      }
      return Err(StoreLockError::Lock(err));
    }

    if mode == LockMode::Exclusive {
      record_holder(&file, command, store)?;
    }
    debug!(mode = ?mode, path = %lock_path.display(), "store locked");

    Ok(StoreLock { file, mode, lock_path })
  }

  pub fn mode(&self) -> LockMode {
    self.mode
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  /// Read the holder record through the held handle. Opening a second handle
  /// would fail on Windows, where locks are mandatory.
  pub fn holder(&self) -> io::Result<LockHolder> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }
}

fn record_holder(file: &File, command: &str, store: &Path) -> Result<(), StoreLockError> {
  let holder = LockHolder {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    store: store.to_path_buf(),
  };

  file.set_len(0).map_err(StoreLockError::WriteHolder)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &holder).map_err(|e| StoreLockError::WriteHolder(io::Error::other(e)))?;
  writer.flush().map_err(StoreLockError::WriteHolder)
}

fn busy_error(lock_path: &Path) -> StoreLockError {
  let holder = std::fs::read_to_string(lock_path)
    .ok()
    .and_then(|contents| serde_json::from_str::<LockHolder>(&contents).ok());

  match holder {
    Some(holder) => StoreLockError::Busy {
      command: holder.command,
      pid: holder.pid,
      started_at: holder.started_at_unix,
      lock_path: lock_path.to_path_buf(),
    },
    None => StoreLockError::BusyUnknown {
      lock_path: lock_path.to_path_buf(),
    },
  }
}

#[cfg(unix)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match mode {
    LockMode::Shared => FlockOperation::NonBlockingLockShared,
    LockMode::Exclusive => FlockOperation::NonBlockingLockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = match mode {
    LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
    LockMode::Exclusive => LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK,
  };

  // SAFETY: a zeroed OVERLAPPED is valid and the handle is owned by `file`.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
