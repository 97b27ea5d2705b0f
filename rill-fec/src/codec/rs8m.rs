use super::{BlockDecoder, BlockEncoder, CodecConfig};
use reed_solomon_erasure::galois_8::ReedSolomon;
use shared::error::{Error, Result};

/// Codes are cached per (k, r) since consecutive blocks almost always
/// share dimensions.
struct CodeCache {
    dims: (usize, usize),
    code: Option<ReedSolomon>,
}

impl CodeCache {
    fn new() -> Self {
        Self {
            dims: (0, 0),
            code: None,
        }
    }

    fn get(&mut self, k: usize, r: usize) -> Result<&ReedSolomon> {
        if self.code.is_none() || self.dims != (k, r) {
            let code = ReedSolomon::new(k, r).map_err(|_| Error::FecEncodeFailed)?;
            self.dims = (k, r);
            self.code = Some(code);
        }
        Ok(self.code.as_ref().unwrap())
    }
}

/// Reed-Solomon encoder over GF(2^8).
pub struct Rs8mEncoder {
    max_block_length: usize,
    cache: CodeCache,
}

impl Rs8mEncoder {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        if config.rs_m != 8 {
            return Err(Error::BadConfig("rs8m codec: only m=8 is supported"));
        }
        Ok(Self {
            max_block_length: (1 << config.rs_m) - 1,
            cache: CodeCache::new(),
        })
    }
}

impl BlockEncoder for Rs8mEncoder {
    fn max_block_length(&self) -> usize {
        self.max_block_length
    }

    fn encode(&mut self, source: &[Vec<u8>], repair: &mut [Vec<u8>]) -> Result<()> {
        if repair.is_empty() {
            return Ok(());
        }
        let code = self.cache.get(source.len(), repair.len())?;
        code.encode_sep(source, repair)
            .map_err(|_| Error::FecEncodeFailed)
    }
}

/// Reed-Solomon decoder over GF(2^8). The code is optimal: any k shards
/// of a block are enough to reconstruct all of it.
pub struct Rs8mDecoder {
    max_block_length: usize,
    cache: CodeCache,
}

impl Rs8mDecoder {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        if config.rs_m != 8 {
            return Err(Error::BadConfig("rs8m codec: only m=8 is supported"));
        }
        Ok(Self {
            max_block_length: (1 << config.rs_m) - 1,
            cache: CodeCache::new(),
        })
    }
}

impl BlockDecoder for Rs8mDecoder {
    fn max_block_length(&self) -> usize {
        self.max_block_length
    }

    fn decode(
        &mut self,
        shards: &mut [Option<Vec<u8>>],
        k: usize,
        _payload_size: usize,
    ) -> Result<bool> {
        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < k {
            return Ok(false);
        }
        if shards.iter().take(k).all(|s| s.is_some()) {
            return Ok(true);
        }

        let code = self.cache.get(k, shards.len() - k)?;
        match code.reconstruct(shards) {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
