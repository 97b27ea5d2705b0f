//! Pluggable block codecs.
//!
//! The block framing (writer/reader) is agnostic to the FEC mathematics;
//! codecs only see equal-sized payload buffers indexed by encoding symbol
//! id. Two schemes are built in: Reed-Solomon over GF(2^8) (optimal, any
//! k packets of a block suffice) and LDPC-Staircase (non-optimal, may
//! need a few extra packets).

mod ldpc;
mod rs8m;

pub use ldpc::{LdpcDecoder, LdpcEncoder};
pub use rs8m::{Rs8mDecoder, Rs8mEncoder};

use packet::FecScheme;
use shared::error::{Error, Result};

/// FEC codec parameters.
#[derive(Debug, Clone, Copy)]
pub struct CodecConfig {
    /// FEC scheme.
    pub scheme: FecScheme,

    /// Seed for LDPC scheme.
    pub ldpc_prng_seed: i32,

    /// N1 parameter of LDPC scheme.
    pub ldpc_n1: u8,

    /// Galois field exponent for Reed-Solomon scheme.
    pub rs_m: u16,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            scheme: FecScheme::None,
            ldpc_prng_seed: 1297501556,
            ldpc_n1: 7,
            rs_m: 8,
        }
    }
}

/// Produces repair payloads for a block of source payloads.
pub trait BlockEncoder {
    /// Maximum allowed k + r.
    fn max_block_length(&self) -> usize;

    /// Fill `repair` payloads from `source` payloads. All buffers must
    /// have the same non-zero size.
    fn encode(&mut self, source: &[Vec<u8>], repair: &mut [Vec<u8>]) -> Result<()>;
}

/// Reconstructs missing payloads of a block.
pub trait BlockDecoder {
    /// Maximum allowed k + r.
    fn max_block_length(&self) -> usize;

    /// Try to fill the missing (`None`) entries of `shards` in place.
    /// The first `k` entries are source payloads, the rest repair.
    /// Returns true when all `k` source payloads are present afterwards.
    ///
    /// For a non-optimal code this may make partial progress and be
    /// retried when more packets arrive.
    fn decode(&mut self, shards: &mut [Option<Vec<u8>>], k: usize, payload_size: usize)
    -> Result<bool>;
}

/// Codec registry. Constructed once at process start and passed by
/// reference into pipeline factories.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecMap;

impl CodecMap {
    pub fn new() -> Self {
        Self
    }

    pub fn has_scheme(&self, scheme: FecScheme) -> bool {
        matches!(scheme, FecScheme::Rs8m | FecScheme::LdpcStaircase)
    }

    pub fn new_encoder(&self, config: &CodecConfig) -> Result<Box<dyn BlockEncoder>> {
        match config.scheme {
            FecScheme::Rs8m => Ok(Box::new(Rs8mEncoder::new(config)?)),
            FecScheme::LdpcStaircase => Ok(Box::new(LdpcEncoder::new(config))),
            FecScheme::None => Err(Error::BadConfig("fec codec: no scheme selected")),
        }
    }

    pub fn new_decoder(&self, config: &CodecConfig) -> Result<Box<dyn BlockDecoder>> {
        match config.scheme {
            FecScheme::Rs8m => Ok(Box::new(Rs8mDecoder::new(config)?)),
            FecScheme::LdpcStaircase => Ok(Box::new(LdpcDecoder::new(config))),
            FecScheme::None => Err(Error::BadConfig("fec codec: no scheme selected")),
        }
    }
}
