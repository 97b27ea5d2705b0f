//! LDPC-Staircase codec (RFC 5170).
//!
//! The parity check matrix has two parts: a left part over the source
//! symbols with N1 ones per column, built with the PMMS pseudo-random
//! generator so that sender and receiver derive identical matrices from
//! the shared seed, and a right "staircase" part over the repair symbols
//! (double diagonal). Decoding is the standard iterative erasure decoder:
//! any parity equation with exactly one unknown symbol yields it by XOR.

use super::{BlockDecoder, BlockEncoder, CodecConfig};
use shared::error::{Error, Result};

/// Cap on k + r. The reference implementation allows much larger blocks,
/// but latency-bounded audio streams never come close.
const MAX_BLOCK_LENGTH: usize = 1024;

/// Park-Miller minimal standard generator, as mandated by RFC 5170.
struct PmmsRand {
    seed: u32,
}

impl PmmsRand {
    fn new(seed: i32) -> Self {
        let mut seed = seed as i64 % 0x7FFF_FFFF;
        if seed <= 0 {
            seed += 0x7FFF_FFFE;
        }
        Self { seed: seed as u32 }
    }

    fn next(&mut self) -> u32 {
        self.seed = ((self.seed as u64 * 16807) % 0x7FFF_FFFF) as u32;
        self.seed
    }

    /// Uniform value in [0; maxv).
    fn rand(&mut self, maxv: usize) -> usize {
        (self.next() as u64 * maxv as u64 / 0x7FFF_FFFF) as usize
    }
}

/// Parity check matrix, rows as sorted column-index lists.
struct Matrix {
    rows: Vec<Vec<usize>>,
}

impl Matrix {
    /// Build the matrix for (k source, r repair) symbols.
    fn build(seed: i32, n1: usize, k: usize, r: usize) -> Self {
        let mut prng = PmmsRand::new(seed);
        let mut rows: Vec<Vec<usize>> = vec![Vec::new(); r];

        let has = |rows: &[Vec<usize>], row: usize, col: usize| rows[row].contains(&col);

        // Left part: N1 ones per source column, drawn from an index pool
        // so the distribution over rows stays homogeneous.
        let mut pool: Vec<usize> = (0..n1 * k).map(|h| h % r).collect();
        let mut taken = 0;
        for col in 0..k {
            for _ in 0..n1.min(r) {
                let mut found = None;
                for i in taken..pool.len() {
                    if !has(&rows, pool[i], col) {
                        found = Some(());
                        break;
                    }
                }
                if found.is_some() {
                    let mut i;
                    loop {
                        i = taken + prng.rand(pool.len() - taken);
                        if !has(&rows, pool[i], col) {
                            break;
                        }
                    }
                    rows[pool[i]].push(col);
                    pool[i] = pool[taken];
                    taken += 1;
                } else {
                    let mut row;
                    loop {
                        row = prng.rand(r);
                        if !has(&rows, row, col) {
                            break;
                        }
                    }
                    rows[row].push(col);
                }
            }
        }

        // Avoid rows with fewer than two ones over the source part.
        for row in 0..r {
            if rows[row].is_empty() {
                rows[row].push(prng.rand(k));
            }
            if rows[row].len() == 1 && k > 1 {
                let mut col;
                loop {
                    col = prng.rand(k);
                    if !has(&rows, row, col) {
                        break;
                    }
                }
                rows[row].push(col);
            }
        }

        // Right part: staircase over repair symbols.
        for (row, cols) in rows.iter_mut().enumerate() {
            cols.push(k + row);
            if row > 0 {
                cols.push(k + row - 1);
            }
            cols.sort_unstable();
        }

        Self { rows }
    }
}

fn xor_into(acc: &mut [u8], src: &[u8]) {
    for (a, b) in acc.iter_mut().zip(src.iter()) {
        *a ^= b;
    }
}

/// LDPC-Staircase encoder.
pub struct LdpcEncoder {
    seed: i32,
    n1: usize,
}

impl LdpcEncoder {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            seed: config.ldpc_prng_seed,
            n1: config.ldpc_n1 as usize,
        }
    }
}

impl BlockEncoder for LdpcEncoder {
    fn max_block_length(&self) -> usize {
        MAX_BLOCK_LENGTH
    }

    fn encode(&mut self, source: &[Vec<u8>], repair: &mut [Vec<u8>]) -> Result<()> {
        if repair.is_empty() {
            return Ok(());
        }
        let k = source.len();
        let r = repair.len();
        let matrix = Matrix::build(self.seed, self.n1, k, r);

        // repair[i] closes parity equation i; equations are chained
        // through the staircase, so fill them in order.
        for row in 0..r {
            let mut acc = vec![0u8; source[0].len()];
            for &col in &matrix.rows[row] {
                if col < k {
                    xor_into(&mut acc, &source[col]);
                } else if col != k + row {
                    // previous repair symbol on the staircase
                    xor_into(&mut acc, &repair[col - k]);
                }
            }
            repair[row].copy_from_slice(&acc);
        }

        Ok(())
    }
}

/// LDPC-Staircase decoder. Non-optimal: reconstruction may need more
/// than k packets and is retried as packets arrive.
pub struct LdpcDecoder {
    seed: i32,
    n1: usize,
}

impl LdpcDecoder {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            seed: config.ldpc_prng_seed,
            n1: config.ldpc_n1 as usize,
        }
    }
}

impl BlockDecoder for LdpcDecoder {
    fn max_block_length(&self) -> usize {
        MAX_BLOCK_LENGTH
    }

    fn decode(
        &mut self,
        shards: &mut [Option<Vec<u8>>],
        k: usize,
        payload_size: usize,
    ) -> Result<bool> {
        let n = shards.len();
        if n <= k {
            return Ok(shards.iter().take(k).all(|s| s.is_some()));
        }
        let r = n - k;
        let matrix = Matrix::build(self.seed, self.n1, k, r);

        // Iterative erasure decoding: solve any equation with a single
        // unknown, repeat until a fixpoint.
        loop {
            let mut progress = false;

            for row in 0..r {
                let mut unknown = None;
                let mut unknown_count = 0;
                for &col in &matrix.rows[row] {
                    if shards[col].is_none() {
                        unknown = Some(col);
                        unknown_count += 1;
                        if unknown_count > 1 {
                            break;
                        }
                    }
                }
                if unknown_count != 1 {
                    continue;
                }

                let target = unknown.unwrap();
                let mut acc = vec![0u8; payload_size];
                for &col in &matrix.rows[row] {
                    if col != target {
                        let shard = shards[col].as_ref().unwrap();
                        if shard.len() != payload_size {
                            return Err(Error::FecDecodeFailed);
                        }
                        xor_into(&mut acc, shard);
                    }
                }
                shards[target] = Some(acc);
                progress = true;
            }

            if !progress {
                break;
            }
        }

        Ok(shards.iter().take(k).all(|s| s.is_some()))
    }
}
