use crate::io::{PacketReader, PacketWriter};
use crate::packet::Packet;
use crate::units;
use shared::error::Result;
use std::cmp::Ordering;
use std::collections::VecDeque;

/// Packet queue ordered by stream position.
///
/// RTP packets are ordered by seqnum, FEC packets by (SBN, ESI), both with
/// wrap-safe comparison. Packets usually arrive almost in order, so
/// insertion scans from the tail. Duplicates (equal position) are dropped.
pub struct SortedQueue {
    packets: VecDeque<Packet>,
}

fn compare(a: &Packet, b: &Packet) -> Ordering {
    if let (Some(ra), Some(rb)) = (&a.rtp, &b.rtp) {
        return units::seqnum_diff(ra.seqnum, rb.seqnum).cmp(&0);
    }
    if let (Some(fa), Some(fb)) = (&a.fec, &b.fec) {
        let blk = units::blknum_diff(fa.source_block_number, fb.source_block_number);
        if blk != 0 {
            return blk.cmp(&0);
        }
        return fa.encoding_symbol_id.cmp(&fb.encoding_symbol_id);
    }
    Ordering::Equal
}

impl SortedQueue {
    pub fn new() -> Self {
        Self {
            packets: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Peek the oldest queued packet.
    pub fn head(&self) -> Option<&Packet> {
        self.packets.front()
    }

    /// Peek the newest queued packet.
    pub fn tail(&self) -> Option<&Packet> {
        self.packets.back()
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }
}

impl Default for SortedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketWriter for SortedQueue {
    fn write(&mut self, packet: Packet) -> Result<()> {
        let mut pos = self.packets.len();
        loop {
            if pos == 0 {
                break;
            }
            match compare(&packet, &self.packets[pos - 1]) {
                Ordering::Greater => break,
                Ordering::Equal => {
                    // duplicate
                    return Ok(());
                }
                Ordering::Less => pos -= 1,
            }
        }
        self.packets.insert(pos, packet);
        Ok(())
    }
}

impl PacketReader for SortedQueue {
    fn read(&mut self) -> Result<Option<Packet>> {
        Ok(self.packets.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Rtp;

    fn rtp_packet(seqnum: u16) -> Packet {
        let mut packet = Packet::new();
        packet.rtp = Some(Rtp {
            seqnum,
            ..Default::default()
        });
        packet
    }

    #[test]
    fn test_reorders() {
        let mut queue = SortedQueue::new();
        for seqnum in [3u16, 1, 2, 5, 4] {
            queue.write(rtp_packet(seqnum)).unwrap();
        }

        let mut got = vec![];
        while let Some(packet) = queue.read().unwrap() {
            got.push(packet.rtp.unwrap().seqnum);
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_drops_duplicates() {
        let mut queue = SortedQueue::new();
        queue.write(rtp_packet(7)).unwrap();
        queue.write(rtp_packet(7)).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_wraparound() {
        let mut queue = SortedQueue::new();
        queue.write(rtp_packet(1)).unwrap();
        queue.write(rtp_packet(0xFFFF)).unwrap();
        queue.write(rtp_packet(0)).unwrap();

        let mut got = vec![];
        while let Some(packet) = queue.read().unwrap() {
            got.push(packet.rtp.unwrap().seqnum);
        }
        assert_eq!(got, vec![0xFFFF, 0, 1]);
    }
}
