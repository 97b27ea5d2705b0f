use crate::header::*;
use byteorder::{ByteOrder, NetworkEndian};

fn packet_len_bytes(data: &[u8], off: usize) -> usize {
    (NetworkEndian::read_u16(&data[off + 2..off + 4]) as usize + 1) * 4
}

/// Streaming parser for compound RTCP packets.
///
/// `parse` validates the structural rules of RFC 3550 (version, allowed
/// types, length fields summing to the buffer length, 4-byte alignment,
/// SR or RR first, padding only on the last sub-packet); `iter` walks
/// the validated sub-packets. Unknown sub-packet types are skipped,
/// malformed inner structures terminate iteration.
pub struct Traverser<'a> {
    data: &'a [u8],
    parsed: bool,
}

/// One sub-packet of a compound packet.
pub enum PacketEvent<'a> {
    Sr(SenderReport, Vec<ReceptionReport>),
    Rr(ReceiverReport, Vec<ReceptionReport>),
    Xr(XrTraverser<'a>),
    Sdes(SdesTraverser<'a>),
    Bye(ByeTraverser<'a>),
}

impl<'a> Traverser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            parsed: false,
        }
    }

    /// Validate the compound packet.
    pub fn parse(&mut self) -> bool {
        self.parsed = false;

        if self.data.is_empty() || self.data.len() % 4 != 0 {
            return false;
        }

        let mut off = 0;
        let mut first = true;
        while off < self.data.len() {
            if off + HEADER_SIZE > self.data.len() {
                return false;
            }
            let b0 = self.data[off];
            if b0 >> 6 != VERSION {
                return false;
            }
            let packet_type = self.data[off + 1];
            if !matches!(
                packet_type,
                RTCP_SR | RTCP_RR | RTCP_SDES | RTCP_BYE | RTCP_APP | RTCP_XR
            ) {
                return false;
            }
            if first && !matches!(packet_type, RTCP_SR | RTCP_RR) {
                return false;
            }

            let len = packet_len_bytes(self.data, off);
            if off + len > self.data.len() {
                return false;
            }
            off += len;

            // padding only on the last sub-packet
            if b0 & 0x20 != 0 && off != self.data.len() {
                return false;
            }
            first = false;
        }

        self.parsed = true;
        true
    }

    pub fn iter(&self) -> PacketIter<'a> {
        assert!(
            self.parsed,
            "rtcp traverser: iter() called before parse() or parse() returned false"
        );
        PacketIter {
            data: self.data,
            off: 0,
        }
    }
}

pub struct PacketIter<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> Iterator for PacketIter<'a> {
    type Item = PacketEvent<'a>;

    fn next(&mut self) -> Option<PacketEvent<'a>> {
        while self.off < self.data.len() {
            let off = self.off;
            let len = packet_len_bytes(self.data, off);
            self.off += len;

            let packet = &self.data[off..off + len];
            let counter = (packet[0] & 0x1F) as usize;

            match packet[1] {
                RTCP_SR => {
                    if packet.len() < 28 || packet.len() < 28 + counter * 24 {
                        continue;
                    }
                    let sr = SenderReport {
                        ssrc: NetworkEndian::read_u32(&packet[4..]),
                        ntp_timestamp: NetworkEndian::read_u64(&packet[8..]),
                        rtp_timestamp: NetworkEndian::read_u32(&packet[16..]),
                        packet_count: NetworkEndian::read_u32(&packet[20..]),
                        byte_count: NetworkEndian::read_u32(&packet[24..]),
                    };
                    let reports = parse_reception_reports(&packet[28..], counter);
                    return Some(PacketEvent::Sr(sr, reports));
                }
                RTCP_RR => {
                    if packet.len() < 8 || packet.len() < 8 + counter * 24 {
                        continue;
                    }
                    let rr = ReceiverReport {
                        ssrc: NetworkEndian::read_u32(&packet[4..]),
                    };
                    let reports = parse_reception_reports(&packet[8..], counter);
                    return Some(PacketEvent::Rr(rr, reports));
                }
                RTCP_XR => {
                    let mut xr = XrTraverser::new(packet);
                    if xr.parse() {
                        return Some(PacketEvent::Xr(xr));
                    }
                }
                RTCP_SDES => {
                    let mut sdes = SdesTraverser::new(packet);
                    if sdes.parse() {
                        return Some(PacketEvent::Sdes(sdes));
                    }
                }
                RTCP_BYE => {
                    let mut bye = ByeTraverser::new(packet);
                    if bye.parse() {
                        return Some(PacketEvent::Bye(bye));
                    }
                }
                // APP and anything else: skip
                _ => {}
            }
        }
        None
    }
}

fn parse_reception_reports(data: &[u8], count: usize) -> Vec<ReceptionReport> {
    let mut reports = Vec::with_capacity(count);
    for i in 0..count {
        let block = &data[i * 24..];
        let loss_word = NetworkEndian::read_u32(&block[4..]);
        let mut cum_loss = (loss_word & 0x00FF_FFFF) as i32;
        if cum_loss & 0x0080_0000 != 0 {
            cum_loss |= -0x0100_0000i32; // sign-extend 24 bits
        }
        reports.push(ReceptionReport {
            ssrc: NetworkEndian::read_u32(&block[0..]),
            fraction_lost: block[4],
            cum_loss,
            last_seqnum: NetworkEndian::read_u32(&block[8..]),
            jitter: NetworkEndian::read_u32(&block[12..]),
            last_sr: NetworkEndian::read_u32(&block[16..]),
            delay_last_sr: NetworkEndian::read_u32(&block[20..]),
        });
    }
    reports
}

//
// XR
//

/// Traverses the blocks of one XR packet.
pub struct XrTraverser<'a> {
    data: &'a [u8],
    parsed: bool,
}

pub enum XrBlockEvent {
    Rrtr(XrRrtr),
    Dlrr(Vec<XrDlrrReport>),
    MeasurementInfo(XrMeasurementInfo),
    DelayMetrics(XrDelayMetrics),
    QueueMetrics(XrQueueMetrics),
}

impl<'a> XrTraverser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            parsed: false,
        }
    }

    pub fn parse(&mut self) -> bool {
        self.parsed =
            self.data.len() >= 8 && self.data[1] == RTCP_XR && packet_len_bytes(self.data, 0) <= self.data.len();
        self.parsed
    }

    pub fn ssrc(&self) -> u32 {
        assert!(self.parsed, "xr traverser: not parsed");
        NetworkEndian::read_u32(&self.data[4..])
    }

    pub fn iter(&self) -> XrBlockIter<'a> {
        assert!(self.parsed, "xr traverser: not parsed");
        XrBlockIter {
            data: &self.data[..packet_len_bytes(self.data, 0)],
            off: 8,
        }
    }
}

pub struct XrBlockIter<'a> {
    data: &'a [u8],
    off: usize,
}

impl Iterator for XrBlockIter<'_> {
    type Item = XrBlockEvent;

    fn next(&mut self) -> Option<XrBlockEvent> {
        while self.off + 4 <= self.data.len() {
            let off = self.off;
            let block_type = self.data[off];
            let block_len = (NetworkEndian::read_u16(&self.data[off + 2..]) as usize + 1) * 4;
            if off + block_len > self.data.len() {
                // malformed block terminates iteration
                return None;
            }
            self.off += block_len;
            let block = &self.data[off..off + block_len];

            match block_type {
                XR_RRTR if block_len >= 12 => {
                    return Some(XrBlockEvent::Rrtr(XrRrtr {
                        ntp_timestamp: NetworkEndian::read_u64(&block[4..]),
                    }));
                }
                XR_DLRR => {
                    let mut reports = vec![];
                    for sub in block[4..].chunks_exact(12) {
                        reports.push(XrDlrrReport {
                            ssrc: NetworkEndian::read_u32(&sub[0..]),
                            last_rr: NetworkEndian::read_u32(&sub[4..]),
                            delay_last_rr: NetworkEndian::read_u32(&sub[8..]),
                        });
                    }
                    return Some(XrBlockEvent::Dlrr(reports));
                }
                XR_MEASUREMENT_INFO if block_len >= 32 => {
                    return Some(XrBlockEvent::MeasurementInfo(XrMeasurementInfo {
                        ssrc: NetworkEndian::read_u32(&block[4..]),
                        first_seq: NetworkEndian::read_u16(&block[10..]),
                        interval_first_seq: NetworkEndian::read_u32(&block[12..]),
                        interval_last_seq: NetworkEndian::read_u32(&block[16..]),
                        interval_duration: NetworkEndian::read_u32(&block[20..]),
                        cum_duration: NetworkEndian::read_u64(&block[24..]),
                    }));
                }
                XR_DELAY_METRICS if block_len >= 28 => {
                    return Some(XrBlockEvent::DelayMetrics(XrDelayMetrics {
                        ssrc: NetworkEndian::read_u32(&block[4..]),
                        mean_rtt: NetworkEndian::read_u32(&block[8..]),
                        min_rtt: NetworkEndian::read_u32(&block[12..]),
                        max_rtt: NetworkEndian::read_u32(&block[16..]),
                        e2e_latency: NetworkEndian::read_u64(&block[20..]),
                    }));
                }
                XR_QUEUE_METRICS if block_len >= 16 => {
                    return Some(XrBlockEvent::QueueMetrics(XrQueueMetrics {
                        ssrc: NetworkEndian::read_u32(&block[4..]),
                        niq_latency: NetworkEndian::read_u32(&block[8..]),
                        niq_stalling: NetworkEndian::read_u32(&block[12..]),
                    }));
                }
                // unknown block types are skipped
                _ => {}
            }
        }
        None
    }
}

//
// SDES
//

/// Traverses the chunks and items of one SDES packet.
pub struct SdesTraverser<'a> {
    data: &'a [u8],
    parsed: bool,
    chunks_count: usize,
}

pub enum SdesEvent {
    Chunk(SdesChunk),
    Item(SdesItem),
}

impl<'a> SdesTraverser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            parsed: false,
            chunks_count: 0,
        }
    }

    pub fn parse(&mut self) -> bool {
        self.parsed = false;
        if self.data.len() < HEADER_SIZE || self.data[1] != RTCP_SDES {
            return false;
        }
        if packet_len_bytes(self.data, 0) > self.data.len() {
            return false;
        }
        self.chunks_count = (self.data[0] & 0x1F) as usize;
        self.parsed = true;
        true
    }

    pub fn chunks_count(&self) -> usize {
        assert!(self.parsed, "sdes traverser: not parsed");
        self.chunks_count
    }

    pub fn iter(&self) -> SdesIter<'a> {
        assert!(self.parsed, "sdes traverser: not parsed");
        SdesIter {
            data: &self.data[..packet_len_bytes(self.data, 0)],
            off: HEADER_SIZE,
            chunks_left: self.chunks_count,
            in_chunk: false,
        }
    }
}

pub struct SdesIter<'a> {
    data: &'a [u8],
    off: usize,
    chunks_left: usize,
    in_chunk: bool,
}

impl Iterator for SdesIter<'_> {
    type Item = SdesEvent;

    fn next(&mut self) -> Option<SdesEvent> {
        if !self.in_chunk {
            if self.chunks_left == 0 || self.off + 4 > self.data.len() {
                return None;
            }
            let ssrc = NetworkEndian::read_u32(&self.data[self.off..]);
            self.off += 4;
            self.chunks_left -= 1;
            self.in_chunk = true;
            return Some(SdesEvent::Chunk(SdesChunk { ssrc }));
        }

        if self.off >= self.data.len() {
            return None;
        }

        let item_type = self.data[self.off];
        if item_type == SDES_END {
            // terminating item; skip padding up to the 32-bit boundary
            self.off += 1;
            while self.off % 4 != 0 && self.off < self.data.len() {
                self.off += 1;
            }
            self.in_chunk = false;
            return self.next();
        }

        if self.off + 2 > self.data.len() {
            return None;
        }
        let text_len = self.data[self.off + 1] as usize;
        if self.off + 2 + text_len > self.data.len() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.data[self.off + 2..self.off + 2 + text_len])
            .into_owned();
        self.off += 2 + text_len;

        Some(SdesEvent::Item(SdesItem { item_type, text }))
    }
}

//
// BYE
//

/// Traverses one BYE packet.
pub struct ByeTraverser<'a> {
    data: &'a [u8],
    parsed: bool,
    ssrc_count: usize,
}

pub enum ByeEvent {
    Ssrc(u32),
    Reason(String),
}

impl<'a> ByeTraverser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            parsed: false,
            ssrc_count: 0,
        }
    }

    pub fn parse(&mut self) -> bool {
        self.parsed = false;
        if self.data.len() < HEADER_SIZE || self.data[1] != RTCP_BYE {
            return false;
        }
        let len = packet_len_bytes(self.data, 0);
        if len > self.data.len() {
            return false;
        }
        self.ssrc_count = (self.data[0] & 0x1F) as usize;
        if HEADER_SIZE + self.ssrc_count * 4 > len {
            return false;
        }
        self.parsed = true;
        true
    }

    pub fn ssrc_count(&self) -> usize {
        assert!(self.parsed, "bye traverser: not parsed");
        self.ssrc_count
    }

    pub fn iter(&self) -> ByeIter<'a> {
        assert!(self.parsed, "bye traverser: not parsed");
        ByeIter {
            data: &self.data[..packet_len_bytes(self.data, 0)],
            off: HEADER_SIZE,
            ssrcs_left: self.ssrc_count,
        }
    }
}

pub struct ByeIter<'a> {
    data: &'a [u8],
    off: usize,
    ssrcs_left: usize,
}

impl Iterator for ByeIter<'_> {
    type Item = ByeEvent;

    fn next(&mut self) -> Option<ByeEvent> {
        if self.ssrcs_left > 0 {
            if self.off + 4 > self.data.len() {
                return None;
            }
            let ssrc = NetworkEndian::read_u32(&self.data[self.off..]);
            self.off += 4;
            self.ssrcs_left -= 1;
            return Some(ByeEvent::Ssrc(ssrc));
        }

        if self.off >= self.data.len() {
            return None;
        }
        let text_len = self.data[self.off] as usize;
        if text_len == 0 || self.off + 1 + text_len > self.data.len() {
            return None;
        }
        let text =
            String::from_utf8_lossy(&self.data[self.off + 1..self.off + 1 + text_len]).into_owned();
        self.off = self.data.len();
        Some(ByeEvent::Reason(text))
    }
}
