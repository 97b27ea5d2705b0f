//! RFC 3550 RTP fixed header layout.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

pub const VERSION: u8 = 2;

/// Size of the fixed header, without CSRC entries or extensions.
pub const HEADER_SIZE: usize = 12;

pub(crate) fn version(b0: u8) -> u8 {
    b0 >> 6
}

pub(crate) fn has_padding(b0: u8) -> bool {
    b0 & 0x20 != 0
}

pub(crate) fn has_extension(b0: u8) -> bool {
    b0 & 0x10 != 0
}

pub(crate) fn csrc_count(b0: u8) -> usize {
    (b0 & 0x0F) as usize
}

pub(crate) fn marker(b1: u8) -> bool {
    b1 & 0x80 != 0
}

pub(crate) fn payload_type(b1: u8) -> u8 {
    b1 & 0x7F
}
