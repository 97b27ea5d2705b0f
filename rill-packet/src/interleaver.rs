use crate::io::PacketWriter;
use crate::packet::Packet;
use rand::seq::SliceRandom;
use shared::error::Result;

/// Reorders adjacent packets before sending so that a burst loss on the
/// wire maps to scattered losses across FEC blocks.
///
/// Packets are collected into a delay line of `block_size` slots and
/// flushed in a fixed pseudo-random permutation. The permutation is drawn
/// once at construction.
pub struct Interleaver {
    writer: Box<dyn PacketWriter>,
    order: Vec<usize>,
    pending: Vec<Option<Packet>>,
    count: usize,
}

impl Interleaver {
    pub fn new(writer: Box<dyn PacketWriter>, block_size: usize) -> Self {
        assert!(block_size > 0, "interleaver: zero block size");

        let mut order: Vec<usize> = (0..block_size).collect();
        order.shuffle(&mut rand::rng());

        let mut pending = Vec::with_capacity(block_size);
        pending.resize_with(block_size, || None);

        Self {
            writer,
            order,
            pending,
            count: 0,
        }
    }

    /// Send out everything collected so far, in permuted order.
    pub fn flush(&mut self) -> Result<()> {
        for index in 0..self.order.len() {
            let slot = self.order[index];
            if let Some(packet) = self.pending[slot].take() {
                self.writer.write(packet)?;
            }
        }
        self.count = 0;
        Ok(())
    }
}

impl PacketWriter for Interleaver {
    fn write(&mut self, packet: Packet) -> Result<()> {
        let slot = self.count;
        self.pending[slot] = Some(packet);
        self.count += 1;

        if self.count == self.pending.len() {
            self.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Rtp;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Capture(Rc<RefCell<Vec<u16>>>);

    impl PacketWriter for Capture {
        fn write(&mut self, packet: Packet) -> Result<()> {
            self.0.borrow_mut().push(packet.rtp.unwrap().seqnum);
            Ok(())
        }
    }

    #[test]
    fn test_all_packets_delivered() {
        let seen: Rc<RefCell<Vec<u16>>> = Rc::default();
        let mut interleaver = Interleaver::new(Box::new(Capture(seen.clone())), 4);

        for seqnum in 0..8u16 {
            let mut packet = Packet::new();
            packet.rtp = Some(Rtp {
                seqnum,
                ..Default::default()
            });
            interleaver.write(packet).unwrap();
        }

        let mut got = seen.borrow().clone();
        got.sort_unstable();
        assert_eq!(got, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_flush_partial() {
        let seen: Rc<RefCell<Vec<u16>>> = Rc::default();
        let mut interleaver = Interleaver::new(Box::new(Capture(seen.clone())), 8);

        for seqnum in 0..3u16 {
            let mut packet = Packet::new();
            packet.rtp = Some(Rtp {
                seqnum,
                ..Default::default()
            });
            interleaver.write(packet).unwrap();
        }
        assert_eq!(seen.borrow().len(), 0);

        interleaver.flush().unwrap();
        assert_eq!(seen.borrow().len(), 3);
    }
}
