#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod composer;
mod encoding;
mod header;
mod parser;

pub use composer::RtpComposer;
pub use encoding::{Encoding, EncodingMap, PAYLOAD_TYPE_L16_MONO, PAYLOAD_TYPE_L16_STEREO};
pub use header::HEADER_SIZE;
pub use parser::RtpParser;
