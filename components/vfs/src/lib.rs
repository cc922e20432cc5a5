// Copyright 2025 cloudraid
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The filesystem surface consumed by a POSIX host adapter: configuration,
//! the file-to-stripe mapper, and the engine that wires the storage stack
//! together.

pub mod config;
pub mod err;
mod fs;
mod mapper;

pub use config::{BackendSpec, Config, ConfigError};
pub use err::{Result, ToErrno, VFSError};
pub use fs::{CloudRaid, CloudRaidBuilder, FsStats};
pub use mapper::FileMapper;
