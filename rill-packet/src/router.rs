use crate::io::PacketWriter;
use crate::packet::Packet;
use shared::error::Result;

/// Dispatches packets to per-kind outputs by their flags.
///
/// The sender pipeline registers one route per endpoint: audio source
/// packets to the source endpoint, repair packets to the repair endpoint.
/// Packets matching no route are dropped.
pub struct Router {
    routes: Vec<(u32, Box<dyn PacketWriter>)>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register an output for packets that carry all of `flags`.
    pub fn add_route(&mut self, flags: u32, writer: Box<dyn PacketWriter>) {
        self.routes.push((flags, writer));
    }

    pub fn num_routes(&self) -> usize {
        self.routes.len()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketWriter for Router {
    fn write(&mut self, packet: Packet) -> Result<()> {
        for (flags, writer) in &mut self.routes {
            if packet.has_flags(*flags) {
                return writer.write(packet);
            }
        }
        log::trace!("router: no route for packet flags {:#x}", packet.flags());
        Ok(())
    }
}
