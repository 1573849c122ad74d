// Copyright 2021 The Keel Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Advisory file locking based on exclusive lock-file creation.
//!
//! A lock is held while its `.lock` file exists; contenders retry with
//! exponential backoff until the holder drops the lock and removes the
//! file. This is portable but not robust against processes that die
//! without cleanup; a stale lock file must then be removed by hand.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use crate::file_util::PathError;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(100);
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// An exclusive advisory lock on a path.
///
/// Released (and the lock file removed) on drop.
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    /// Blocks until the lock file at `path` can be created exclusively.
    ///
    /// Gives up with the underlying `AlreadyExists` error after roughly
    /// ten seconds of contention.
    pub fn lock(path: PathBuf) -> Result<Self, PathError> {
        let deadline = Instant::now() + LOCK_TIMEOUT;
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(file) => {
                    return Ok(Self { path, _file: file });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        tracing::warn!(path = %path.display(), "timed out waiting for lock file");
                        return Err(PathError { path, source: err });
                    }
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(err) => {
                    return Err(PathError { path, source: err });
                }
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(?err, path = %self.path.display(), "failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_lock_basic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join("test.lock");
        {
            let _lock = FileLock::lock(lock_path.clone()).unwrap();
            assert!(lock_path.exists());
        }
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_lock_concurrent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join("test.lock");
        let data = Arc::new(Mutex::new(0u32));
        let mut threads = vec![];
        for _ in 0..4 {
            let lock_path = lock_path.clone();
            let data = data.clone();
            threads.push(thread::spawn(move || {
                let _lock = FileLock::lock(lock_path).unwrap();
                let mut guard = data.lock().unwrap();
                *guard += 1;
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(*data.lock().unwrap(), 4);
    }
}
