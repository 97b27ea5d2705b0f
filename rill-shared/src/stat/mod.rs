//! Sliding-window statistics used by jitter and RTT estimation.

mod mov_aggregate;
mod mov_quantile;

pub use mov_aggregate::MovAggregate;
pub use mov_quantile::MovQuantile;
