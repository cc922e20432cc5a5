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

//! Reed–Solomon (k+m) erasure coding over GF(2⁸).
//!
//! A stripe payload is split into k equal-length data chunks and extended
//! with m parity chunks via a Vandermonde matrix; any k of the k+m chunks
//! reconstruct the payload.

mod coder;
mod err;
mod gf256;

pub use coder::{ErasureCoder, LENGTH_PREFIX};
pub use err::{DecodeError, EncodeError};
