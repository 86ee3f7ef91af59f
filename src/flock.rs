use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Exclusive lock on a data directory, backed by an advisory OS file
/// lock. The lock file records the owning pid, so a contended acquire can
/// name the holder. The OS drops the lock with the file handle; a stale
/// lock file left by a crashed process never blocks a reopen.
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Acquires the lock, failing with Error::Locked if another process
    /// holds it.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Open without truncating: on contention the current contents are
        // the holder's pid.
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        if !Self::try_acquire(&file)? {
            let mut owner = String::new();
            file.read_to_string(&mut owner).ok();
            let owner = owner.trim();
            return Err(Error::Locked(if owner.is_empty() {
                path.display().to_string()
            } else {
                format!("{} (held by pid {owner})", path.display())
            }));
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One non-blocking lock attempt. Ok(false) means another handle holds
    /// the lock; anything else that goes wrong is a genuine IO error.
    #[cfg(unix)]
    fn try_acquire(file: &File) -> Result<bool> {
        use std::os::unix::io::AsRawFd;

        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EWOULDBLOCK) => Ok(false),
            _ => Err(err.into()),
        }
    }

    #[cfg(windows)]
    fn try_acquire(file: &File) -> Result<bool> {
        use std::os::windows::io::AsRawHandle;

        use winapi::shared::winerror::ERROR_LOCK_VIOLATION;
        use winapi::um::fileapi::LockFile;

        // The file is only a pid marker; locking its first byte is enough
        // to serialize owners.
        if unsafe { LockFile(file.as_raw_handle() as *mut _, 0, 0, 1, 0) } != 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == ERROR_LOCK_VIOLATION as i32 => Ok(false),
            _ => Err(err.into()),
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn try_acquire(_file: &File) -> Result<bool> {
        Ok(true)
    }
}
