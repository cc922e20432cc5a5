use bytes::{BufMut, Bytes, BytesMut};
use snafu::ensure;

use crate::err::{
    DecodeError, EncodeError, InsufficientSnafu, InvalidParametersSnafu, ShortChunkSnafu,
    SingularSnafu, WrongChunkCountSnafu,
};
use crate::gf256;

/// Every chunk starts with the original payload length as a little-endian
/// u64, so the length survives the loss of any m chunks.
pub const LENGTH_PREFIX: usize = 8;

/// Reed–Solomon coder for a fixed (k, m) geometry.
///
/// The encoding matrix is Vandermonde: row r, column c holds `(r+1)^c` in
/// GF(2⁸), so any k rows form an invertible system.
#[derive(Debug, Clone, Copy)]
pub struct ErasureCoder {
    k: usize,
    m: usize,
}

impl ErasureCoder {
    pub fn new(k: usize, m: usize) -> Result<Self, EncodeError> {
        // The row evaluation points 1..=k+m must be distinct field elements.
        ensure!(k >= 1 && k + m <= 255, InvalidParametersSnafu { k, m });
        Ok(Self { k, m })
    }

    pub fn data_chunks(&self) -> usize {
        self.k
    }

    pub fn parity_chunks(&self) -> usize {
        self.m
    }

    pub fn total_chunks(&self) -> usize {
        self.k + self.m
    }

    fn matrix_row(&self, row: usize) -> Vec<u8> {
        let x = (row + 1) as u8;
        let mut coeffs = Vec::with_capacity(self.k);
        let mut v = 1u8;
        for _ in 0..self.k {
            coeffs.push(v);
            v = gf256::mul(v, x);
        }
        coeffs
    }

    /// Encode a payload into k+m chunks of identical length
    /// `LENGTH_PREFIX + ⌈|data| / k⌉`.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Bytes>, EncodeError> {
        let k = self.k;
        let chunk_len = data.len().div_ceil(k);

        let mut padded = Vec::with_capacity(k * chunk_len);
        padded.extend_from_slice(data);
        padded.resize(k * chunk_len, 0);

        let mut out = Vec::with_capacity(self.total_chunks());
        for row in 0..self.total_chunks() {
            let coeffs = self.matrix_row(row);
            let mut chunk = BytesMut::with_capacity(LENGTH_PREFIX + chunk_len);
            chunk.put_u64_le(data.len() as u64);
            chunk.resize(LENGTH_PREFIX + chunk_len, 0);

            let body = &mut chunk[LENGTH_PREFIX..];
            for (col, &coef) in coeffs.iter().enumerate() {
                let src = &padded[col * chunk_len..(col + 1) * chunk_len];
                match coef {
                    0 => {}
                    1 => {
                        for (dst, &s) in body.iter_mut().zip(src) {
                            *dst ^= s;
                        }
                    }
                    _ => {
                        for (dst, &s) in body.iter_mut().zip(src) {
                            *dst ^= gf256::mul(coef, s);
                        }
                    }
                }
            }
            out.push(chunk.freeze());
        }
        Ok(out)
    }

    /// Decode the original payload from any k surviving chunks. `chunks`
    /// must have length k+m; an empty entry means the chunk is absent.
    pub fn decode(&self, chunks: &[Bytes]) -> Result<Bytes, DecodeError> {
        let k = self.k;
        ensure!(
            chunks.len() == self.total_chunks(),
            WrongChunkCountSnafu {
                got: chunks.len(),
                expected: self.total_chunks(),
            }
        );

        // First k non-empty chunks, remembering their matrix rows.
        let valid: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_empty())
            .map(|(i, _)| i)
            .take(k)
            .collect();
        ensure!(
            valid.len() == k,
            InsufficientSnafu {
                available: valid.len(),
                required: k,
            }
        );

        let total_len = chunks[valid[0]].len();
        ensure!(
            total_len >= LENGTH_PREFIX,
            ShortChunkSnafu {
                index: valid[0],
                len: total_len,
                expected: LENGTH_PREFIX,
            }
        );
        for &i in &valid {
            ensure!(
                chunks[i].len() == total_len,
                ShortChunkSnafu {
                    index: i,
                    len: chunks[i].len(),
                    expected: total_len,
                }
            );
        }
        let chunk_len = total_len - LENGTH_PREFIX;

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&chunks[valid[0]][..LENGTH_PREFIX]);
        let orig_size = u64::from_le_bytes(prefix) as usize;
        ensure!(
            orig_size <= k * chunk_len,
            ShortChunkSnafu {
                index: valid[0],
                len: chunk_len,
                expected: orig_size.div_ceil(k),
            }
        );

        let sub: Vec<Vec<u8>> = valid.iter().map(|&r| self.matrix_row(r)).collect();
        let inverse = invert(sub)?;

        // out[i * chunk_len + b] = Σ_r inverse[i][r] · chunk(valid[r])[b]
        let mut out = vec![0u8; k * chunk_len];
        for (i, coeffs) in inverse.iter().enumerate() {
            let dst = &mut out[i * chunk_len..(i + 1) * chunk_len];
            for (r, &coef) in coeffs.iter().enumerate() {
                let src = &chunks[valid[r]][LENGTH_PREFIX..];
                match coef {
                    0 => {}
                    1 => {
                        for (d, &s) in dst.iter_mut().zip(src) {
                            *d ^= s;
                        }
                    }
                    _ => {
                        for (d, &s) in dst.iter_mut().zip(src) {
                            *d ^= gf256::mul(coef, s);
                        }
                    }
                }
            }
        }

        out.truncate(orig_size);
        Ok(Bytes::from(out))
    }
}

/// Gauss–Jordan inversion with partial pivoting.
fn invert(mut mat: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, DecodeError> {
    let n = mat.len();
    let mut inv: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let mut row = vec![0u8; n];
            row[i] = 1;
            row
        })
        .collect();

    for col in 0..n {
        let pivot = (col..n).find(|&r| mat[r][col] != 0);
        let Some(pivot) = pivot else {
            return SingularSnafu.fail();
        };
        mat.swap(col, pivot);
        inv.swap(col, pivot);

        let scale = gf256::inv(mat[col][col]);
        for j in 0..n {
            mat[col][j] = gf256::mul(mat[col][j], scale);
            inv[col][j] = gf256::mul(inv[col][j], scale);
        }

        for row in 0..n {
            if row == col || mat[row][col] == 0 {
                continue;
            }
            let factor = mat[row][col];
            for j in 0..n {
                let a = gf256::mul(factor, mat[col][j]);
                let b = gf256::mul(factor, inv[col][j]);
                mat[row][j] ^= a;
                inv[row][j] ^= b;
            }
        }
    }
    Ok(inv)
}
