#![warn(rust_2018_idioms)]
#![allow(dead_code)]

mod factory;
mod interleaver;
mod packet;
mod queue;
mod router;
mod sorted_queue;

pub mod io;
pub mod units;

pub use factory::PacketFactory;
pub use interleaver::Interleaver;
pub use packet::{Fec, FecScheme, Packet, Rtcp, Rtp, Udp};
pub use queue::{ConcurrentQueue, QueueConsumer, QueueProducer};
pub use router::Router;
pub use sorted_queue::SortedQueue;
