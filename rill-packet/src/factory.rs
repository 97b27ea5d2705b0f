use crate::packet::Packet;
use bytes::BytesMut;

/// Allocates packets and packet byte buffers of a fixed maximum size.
///
/// Buffer capacity is decided once at construction so that every stage in
/// a pipeline agrees on the largest packet it may produce; a stage that
/// needs more than `buffer_size` bytes treats it as memory exhaustion.
#[derive(Debug, Clone)]
pub struct PacketFactory {
    buffer_size: usize,
}

impl PacketFactory {
    pub fn new(buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "packet factory: zero buffer size");
        Self { buffer_size }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn new_packet(&self) -> Packet {
        Packet::new()
    }

    /// Allocate a zero-length buffer with the factory's fixed capacity,
    /// or `None` if the requested size cannot be served.
    pub fn new_packet_buffer(&self, needed: usize) -> Option<BytesMut> {
        if needed > self.buffer_size {
            return None;
        }
        Some(BytesMut::with_capacity(self.buffer_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_capacity() {
        let factory = PacketFactory::new(128);

        let buf = factory.new_packet_buffer(100).unwrap();
        assert!(buf.capacity() >= 128);
        assert_eq!(buf.len(), 0);

        assert!(factory.new_packet_buffer(129).is_none());
    }
}
