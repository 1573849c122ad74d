// Copyright 2023 The Keel Authors
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

//! Injectable time source.
//!
//! Op timestamps and signed request headers read the clock through a handle
//! passed in at construction, so tests can substitute a deterministic clock.

use std::fmt::Debug;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// A source of wall-clock time.
pub trait Clock: Send + Sync + Debug {
    /// Nanoseconds since the unix epoch.
    fn now_nanos(&self) -> i64;

    /// Whole seconds since the unix epoch.
    fn now_secs(&self) -> i64 {
        self.now_nanos() / 1_000_000_000
    }
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64
    }
}
