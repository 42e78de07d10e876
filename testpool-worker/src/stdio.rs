// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Scoped redirection of the process stdio into a capture file.
//!
//! Redirection happens at the file-descriptor level so that every byte the
//! evaluated code writes lands in the capture file, whichever API it goes
//! through. The original descriptors are restored on drop, on every exit
//! path; if the process dies mid-write the partial file contents survive on
//! disk and are presented verbatim.

use nix::unistd::{close, dup, dup2};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

const STDOUT_FD: RawFd = 1;
const STDERR_FD: RawFd = 2;

pub struct CaptureGuard {
    saved_stdout: RawFd,
    saved_stderr: RawFd,
}

impl CaptureGuard {
    /// Redirects fds 1 and 2 into `path`. Item captures truncate so a retry
    /// shows only its own run; setup captures also truncate, once per
    /// (worker, setup) evaluation.
    pub fn redirect_to(path: &Path, truncate: bool) -> io::Result<CaptureGuard> {
        // Buffered bytes written before the redirect belong to the previous
        // scope; push them out through the old descriptors first.
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(truncate)
            .append(!truncate)
            .open(path)?;

        let saved_stdout = dup(STDOUT_FD).map_err(io::Error::from)?;
        let saved_stderr = match dup(STDERR_FD) {
            Ok(fd) => fd,
            Err(err) => {
                let _ = close(saved_stdout);
                return Err(io::Error::from(err));
            }
        };
        let guard = CaptureGuard {
            saved_stdout,
            saved_stderr,
        };
        dup2(file.as_raw_fd(), STDOUT_FD).map_err(io::Error::from)?;
        dup2(file.as_raw_fd(), STDERR_FD).map_err(io::Error::from)?;
        Ok(guard)
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        let _ = dup2(self.saved_stdout, STDOUT_FD);
        let _ = dup2(self.saved_stderr, STDERR_FD);
        let _ = close(self.saved_stdout);
        let _ = close(self.saved_stderr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_truncates_and_restores() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = dir.path().join("capture.log");

        {
            let _guard = CaptureGuard::redirect_to(&path, true).expect("redirect failed");
            println!("first run");
        }
        assert!(std::fs::read_to_string(&path).unwrap().contains("first run"));

        {
            let _guard = CaptureGuard::redirect_to(&path, true).expect("redirect failed");
            println!("second run");
        }
        let captured = std::fs::read_to_string(&path).unwrap();
        assert!(captured.contains("second run"));
        assert!(!captured.contains("first run"));
    }

    #[test]
    fn append_mode_accumulates() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let path = dir.path().join("capture.log");

        for chunk in ["appended-one", "appended-two"] {
            let _guard = CaptureGuard::redirect_to(&path, false).expect("redirect failed");
            println!("{chunk}");
        }
        let captured = std::fs::read_to_string(&path).unwrap();
        assert!(captured.contains("appended-one"));
        assert!(captured.contains("appended-two"));
    }
}
