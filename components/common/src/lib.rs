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

pub const CLOUDRAID: &str = "cloudraid";

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;

/// Default size of one logical stripe.
pub const STRIPE_SIZE: usize = 4 << 20; // 4 MiB

/// Stripe ids below this bound belong to the metadata chain; user stripes
/// start at `RESERVED_STRIPES` and grow monotonically.
pub const RESERVED_STRIPES: u64 = 100;

/// Path the metadata chain registers itself under. Hidden from directory
/// listings and rejected for user operations.
pub const META_PATH: &str = "/.__cloudraidfs_meta";

/// Identifier of a stripe, unique within a mount lifetime.
pub type StripeId = u64;

/// Index of a chunk within a stripe, in `[0, k + m)`.
pub type ChunkIndex = usize;

pub fn cal_stripe_idx(offset: u64, stripe_size: usize) -> u64 {
    offset / stripe_size as u64
}

pub fn cal_stripe_offset(offset: u64, stripe_size: usize) -> usize {
    (offset % stripe_size as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_index_math() {
        let ss = STRIPE_SIZE;
        assert_eq!(cal_stripe_idx(0, ss), 0);
        assert_eq!(cal_stripe_idx(ss as u64 - 1, ss), 0);
        assert_eq!(cal_stripe_idx(ss as u64, ss), 1);
        assert_eq!(cal_stripe_offset(ss as u64 + 42, ss), 42);
    }
}
