#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod block_reader;
mod block_writer;
mod composer;

pub mod codec;

pub use block_reader::{BlockReader, BlockReaderConfig, BlockReaderMetrics};
pub use block_writer::{BlockWriter, BlockWriterConfig};
pub use composer::{FecComposer, FecParser, PacketKind, payload_id_len};

pub use packet::FecScheme;
