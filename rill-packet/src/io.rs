//! Seams between pipeline stages and towards external transports.

use crate::packet::Packet;
use bytes::BytesMut;
use shared::error::Result;

/// Downstream sink for packets.
///
/// Implemented by pipeline stages (FEC writer, interleaver, router) and by
/// the caller's outbound transport glue.
pub trait PacketWriter {
    fn write(&mut self, packet: Packet) -> Result<()>;
}

/// Upstream source of packets.
///
/// `Ok(None)` means no packet is available right now; the reader never
/// blocks waiting for data.
pub trait PacketReader {
    fn read(&mut self) -> Result<Option<Packet>>;
}

/// Builds outgoing packets of one protocol stack.
///
/// A composer may wrap an inner composer, adding its own header or footer
/// around the inner protocol: `prepare` carves up the buffer and fills the
/// packet sub-record ranges, `compose` writes the actual header bytes once
/// the fields are final.
pub trait Composer {
    /// Attach a zeroed buffer to the packet and reserve room for all
    /// headers of the chain, for a payload of `payload_size` bytes.
    fn prepare(&self, packet: &mut Packet, buffer: BytesMut, payload_size: usize) -> Result<()>;

    /// Write header (and footer) bytes from the packet sub-records
    /// into the prepared buffer.
    fn compose(&self, packet: &mut Packet) -> Result<()>;
}

/// Parses incoming packets of one protocol stack.
///
/// A parser may wrap an inner parser, stripping its own header or footer
/// and handing the remaining region to the inner protocol.
pub trait Parser {
    /// Parse the given byte range of the packet buffer, filling packet
    /// sub-records.
    fn parse(&self, packet: &mut Packet, region: std::ops::Range<usize>) -> Result<()>;
}

/// Composes prepared packets and forwards them downstream. Used on
/// paths without a FEC writer, which otherwise owns composition.
pub struct ComposingWriter {
    composer: Box<dyn Composer>,
    inner: Box<dyn PacketWriter>,
}

impl ComposingWriter {
    pub fn new(composer: Box<dyn Composer>, inner: Box<dyn PacketWriter>) -> Self {
        Self { composer, inner }
    }
}

impl PacketWriter for ComposingWriter {
    fn write(&mut self, mut packet: Packet) -> Result<()> {
        self.composer.compose(&mut packet)?;
        packet.add_flags(Packet::FLAG_COMPOSED);
        self.inner.write(packet)
    }
}

impl<W: PacketWriter + ?Sized> PacketWriter for Box<W> {
    fn write(&mut self, packet: Packet) -> Result<()> {
        (**self).write(packet)
    }
}

impl<R: PacketReader + ?Sized> PacketReader for Box<R> {
    fn read(&mut self) -> Result<Option<Packet>> {
        (**self).read()
    }
}
