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

//! The stripe storage engine: chunk backends, the RAID fan-out layer, the
//! in-memory caches and the disk-spooled write-back uploader.

mod backend;
mod cache;
pub mod err;
mod file_cache;
mod raid;
mod uploader;

pub use backend::{ChunkBackend, ChunkBackendRef, ObjectBackend};
pub use cache::{CacheStats, ChunkCache, ChunkCacheConfig};
pub use err::{Error, Result};
pub use file_cache::{FileCache, FileCacheConfig};
pub use raid::{BackendStats, FanoutStats, RaidStore};
pub use uploader::{AsyncUploader, UploadConfig, UploaderStats};
