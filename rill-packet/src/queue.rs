use crate::io::{PacketReader, PacketWriter};
use crate::packet::Packet;
use log::warn;
use shared::error::Result;
use std::sync::mpsc;

/// Multi-producer single-consumer packet queue for the boundary between
/// network I/O threads and a pipeline thread.
///
/// Producers enqueue without backpressure: when the bound is reached the
/// packet is dropped. The consumer drains at `refresh` time.
pub struct ConcurrentQueue;

impl ConcurrentQueue {
    pub fn new(bound: usize) -> (QueueProducer, QueueConsumer) {
        assert!(bound > 0, "concurrent queue: zero bound");
        let (tx, rx) = mpsc::sync_channel(bound);
        (QueueProducer { tx }, QueueConsumer { rx })
    }
}

/// Producer half; clone one per network thread.
#[derive(Clone)]
pub struct QueueProducer {
    tx: mpsc::SyncSender<Packet>,
}

impl PacketWriter for QueueProducer {
    fn write(&mut self, packet: Packet) -> Result<()> {
        if self.tx.try_send(packet).is_err() {
            // Queue full or consumer gone: drop, never block the
            // network thread.
            warn!("concurrent queue: overflow, dropping packet");
        }
        Ok(())
    }
}

/// Consumer half, owned by the pipeline thread.
pub struct QueueConsumer {
    rx: mpsc::Receiver<Packet>,
}

impl PacketReader for QueueConsumer {
    fn read(&mut self) -> Result<Option<Packet>> {
        match self.rx.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = ConcurrentQueue::new(8);

        for seqnum in 0..3u16 {
            let mut packet = Packet::new();
            packet.rtp = Some(crate::Rtp {
                seqnum,
                ..Default::default()
            });
            tx.write(packet).unwrap();
        }

        for seqnum in 0..3u16 {
            let packet = rx.read().unwrap().unwrap();
            assert_eq!(packet.rtp.as_ref().unwrap().seqnum, seqnum);
        }
        assert!(rx.read().unwrap().is_none());
    }

    #[test]
    fn test_overflow_drops() {
        let (mut tx, mut rx) = ConcurrentQueue::new(2);

        for _ in 0..5 {
            tx.write(Packet::new()).unwrap();
        }

        let mut count = 0;
        while rx.read().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_cross_thread() {
        let (tx, mut rx) = ConcurrentQueue::new(64);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mut tx = tx.clone();
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        tx.write(Packet::new()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut count = 0;
        while rx.read().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 32);
    }
}
