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

//! File and directory metadata: path → (size, stripe list) mapping, the
//! directory tree, and its persistence as a chain of reserved stripes.

mod allocator;
pub mod err;
mod store;
mod trie;

pub use allocator::AllocatorClock;
pub use err::{Error, Result};
pub use store::{FileEntry, MetadataStore};
