use crate::header::*;
use byteorder::{ByteOrder, NetworkEndian};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Top,
    SrHead,
    SrReport,
    RrHead,
    RrReport,
    XrHead,
    XrDlrrHead,
    XrDlrrReport,
    SdesHead,
    SdesChunk,
    ByeHead,
    ByeSsrc,
    ByeReason,
    End,
}

/// Compound RTCP packet builder.
///
/// Enforces the structural rules of RFC 3550:
///  - first sub-packet must be SR or RR (an empty RR is permitted);
///  - each SDES chunk has exactly one CNAME item;
///  - padding may only be attached to the last sub-packet;
///  - length fields add up to the total length;
///  - every sub-packet starts at a 4-byte boundary.
///
/// Out-of-order calls are programming errors and panic. Running out of
/// the size limit is not: the `ok` flag is cleared, the partially
/// written sub-packet is rolled back, subsequent calls become no-ops,
/// and `finish` returns the sub-packets that fit. The caller then emits
/// that packet and starts a new one for the remainder; this is how
/// multi-packet RTCP fragmentation is realized.
pub struct Builder {
    buf: Vec<u8>,
    limit: usize,

    state: State,
    packet_start: usize,
    xr_block_start: usize,

    report_written: bool,
    cname_written: bool,

    ok: bool,
}

impl Builder {
    /// Build into at most `limit` bytes (usually the UDP MTU).
    pub fn new(limit: usize) -> Self {
        assert!(limit >= HEADER_SIZE, "rtcp builder: limit too small");
        Self {
            buf: Vec::with_capacity(limit),
            limit,
            state: State::Top,
            packet_start: 0,
            xr_block_start: 0,
            report_written: false,
            cname_written: false,
            ok: true,
        }
    }

    /// False if some sub-packet did not fit into the limit.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Bytes written so far (completed sub-packets only if truncated).
    pub fn written_len(&self) -> usize {
        self.buf.len()
    }

    /// Finish and return the compound packet bytes.
    pub fn finish(self) -> Vec<u8> {
        if self.ok {
            assert!(
                self.state == State::Top || self.state == State::End,
                "rtcp builder: finish() called in the middle of a packet"
            );
        }
        self.buf
    }

    //
    // Sender report
    //

    pub fn begin_sr(&mut self, sr: &SenderReport) {
        assert!(self.state == State::Top, "rtcp builder: wrong call order");

        self.begin_packet(RTCP_SR);
        if let Some(off) = self.extend(24) {
            NetworkEndian::write_u32(&mut self.buf[off..], sr.ssrc);
            NetworkEndian::write_u64(&mut self.buf[off + 4..], sr.ntp_timestamp);
            NetworkEndian::write_u32(&mut self.buf[off + 12..], sr.rtp_timestamp);
            NetworkEndian::write_u32(&mut self.buf[off + 16..], sr.packet_count);
            NetworkEndian::write_u32(&mut self.buf[off + 20..], sr.byte_count);
        }

        self.state = State::SrHead;
        self.report_written = true;
    }

    pub fn add_sr_report(&mut self, report: &ReceptionReport) {
        assert!(
            self.state == State::SrHead || self.state == State::SrReport,
            "rtcp builder: wrong call order"
        );

        self.add_reception_report(report);
        self.state = State::SrReport;
    }

    pub fn end_sr(&mut self) {
        assert!(
            self.state == State::SrHead || self.state == State::SrReport,
            "rtcp builder: wrong call order"
        );

        self.end_packet();
    }

    //
    // Receiver report
    //

    pub fn begin_rr(&mut self, rr: &ReceiverReport) {
        assert!(self.state == State::Top, "rtcp builder: wrong call order");

        self.begin_packet(RTCP_RR);
        if let Some(off) = self.extend(4) {
            NetworkEndian::write_u32(&mut self.buf[off..], rr.ssrc);
        }

        self.state = State::RrHead;
        self.report_written = true;
    }

    pub fn add_rr_report(&mut self, report: &ReceptionReport) {
        assert!(
            self.state == State::RrHead || self.state == State::RrReport,
            "rtcp builder: wrong call order"
        );

        self.add_reception_report(report);
        self.state = State::RrReport;
    }

    pub fn end_rr(&mut self) {
        assert!(
            self.state == State::RrHead || self.state == State::RrReport,
            "rtcp builder: wrong call order"
        );

        self.end_packet();
    }

    //
    // Extended report
    //

    pub fn begin_xr(&mut self, xr: &XrHeader) {
        assert!(self.state == State::Top, "rtcp builder: wrong call order");
        assert!(
            self.report_written,
            "rtcp builder: first packet should be SR or RR"
        );

        self.begin_packet(RTCP_XR);
        if let Some(off) = self.extend(4) {
            NetworkEndian::write_u32(&mut self.buf[off..], xr.ssrc);
        }

        self.state = State::XrHead;
    }

    pub fn add_xr_rrtr(&mut self, rrtr: &XrRrtr) {
        assert!(self.state == State::XrHead, "rtcp builder: wrong call order");

        if let Some(off) = self.extend(12) {
            self.write_xr_block_header(off, XR_RRTR, 12);
            NetworkEndian::write_u64(&mut self.buf[off + 4..], rrtr.ntp_timestamp);
        }
    }

    pub fn begin_xr_dlrr(&mut self) {
        assert!(self.state == State::XrHead, "rtcp builder: wrong call order");

        if let Some(off) = self.extend(4) {
            self.xr_block_start = off;
            self.buf[off] = XR_DLRR;
        }

        self.state = State::XrDlrrHead;
    }

    pub fn add_xr_dlrr_report(&mut self, report: &XrDlrrReport) {
        assert!(
            self.state == State::XrDlrrHead || self.state == State::XrDlrrReport,
            "rtcp builder: wrong call order"
        );

        if let Some(off) = self.extend(12) {
            NetworkEndian::write_u32(&mut self.buf[off..], report.ssrc);
            NetworkEndian::write_u32(&mut self.buf[off + 4..], report.last_rr);
            NetworkEndian::write_u32(&mut self.buf[off + 8..], report.delay_last_rr);
        }

        self.state = State::XrDlrrReport;
    }

    pub fn end_xr_dlrr(&mut self) {
        assert!(
            self.state == State::XrDlrrReport,
            "rtcp builder: wrong call order"
        );

        if self.ok {
            let len = self.buf.len() - self.xr_block_start;
            let words = (len / 4 - 1) as u16;
            NetworkEndian::write_u16(&mut self.buf[self.xr_block_start + 2..], words);
        }

        self.state = State::XrHead;
    }

    pub fn add_xr_measurement_info(&mut self, info: &XrMeasurementInfo) {
        assert!(self.state == State::XrHead, "rtcp builder: wrong call order");

        if let Some(off) = self.extend(32) {
            self.write_xr_block_header(off, XR_MEASUREMENT_INFO, 32);
            NetworkEndian::write_u32(&mut self.buf[off + 4..], info.ssrc);
            NetworkEndian::write_u16(&mut self.buf[off + 10..], info.first_seq);
            NetworkEndian::write_u32(&mut self.buf[off + 12..], info.interval_first_seq);
            NetworkEndian::write_u32(&mut self.buf[off + 16..], info.interval_last_seq);
            NetworkEndian::write_u32(&mut self.buf[off + 20..], info.interval_duration);
            NetworkEndian::write_u64(&mut self.buf[off + 24..], info.cum_duration);
        }
    }

    pub fn add_xr_delay_metrics(&mut self, metrics: &XrDelayMetrics) {
        assert!(self.state == State::XrHead, "rtcp builder: wrong call order");

        if let Some(off) = self.extend(28) {
            self.write_xr_block_header(off, XR_DELAY_METRICS, 28);
            NetworkEndian::write_u32(&mut self.buf[off + 4..], metrics.ssrc);
            NetworkEndian::write_u32(&mut self.buf[off + 8..], metrics.mean_rtt);
            NetworkEndian::write_u32(&mut self.buf[off + 12..], metrics.min_rtt);
            NetworkEndian::write_u32(&mut self.buf[off + 16..], metrics.max_rtt);
            NetworkEndian::write_u64(&mut self.buf[off + 20..], metrics.e2e_latency);
        }
    }

    pub fn add_xr_queue_metrics(&mut self, metrics: &XrQueueMetrics) {
        assert!(self.state == State::XrHead, "rtcp builder: wrong call order");

        if let Some(off) = self.extend(16) {
            self.write_xr_block_header(off, XR_QUEUE_METRICS, 16);
            NetworkEndian::write_u32(&mut self.buf[off + 4..], metrics.ssrc);
            NetworkEndian::write_u32(&mut self.buf[off + 8..], metrics.niq_latency);
            NetworkEndian::write_u32(&mut self.buf[off + 12..], metrics.niq_stalling);
        }
    }

    pub fn end_xr(&mut self) {
        assert!(self.state == State::XrHead, "rtcp builder: wrong call order");

        self.end_packet();
    }

    //
    // Source description
    //

    pub fn begin_sdes(&mut self) {
        assert!(self.state == State::Top, "rtcp builder: wrong call order");
        assert!(
            self.report_written,
            "rtcp builder: first packet should be SR or RR"
        );

        self.begin_packet(RTCP_SDES);
        self.state = State::SdesHead;
    }

    pub fn begin_sdes_chunk(&mut self, chunk: &SdesChunk) {
        assert!(self.state == State::SdesHead, "rtcp builder: wrong call order");

        if let Some(off) = self.extend(4) {
            NetworkEndian::write_u32(&mut self.buf[off..], chunk.ssrc);
            self.inc_counter();
        }

        self.state = State::SdesChunk;
        self.cname_written = false;
    }

    pub fn add_sdes_item(&mut self, item: &SdesItem) {
        assert!(self.state == State::SdesChunk, "rtcp builder: wrong call order");
        assert!(
            item.text.len() <= MAX_TEXT_LEN,
            "rtcp builder: SDES item text too long"
        );

        let text = item.text.as_bytes();
        if let Some(off) = self.extend(2 + text.len()) {
            self.buf[off] = item.item_type;
            self.buf[off + 1] = text.len() as u8;
            self.buf[off + 2..off + 2 + text.len()].copy_from_slice(text);
        }

        if item.item_type == SDES_CNAME {
            assert!(
                !self.cname_written,
                "rtcp builder: each SDES chunk should have exactly one CNAME item"
            );
            self.cname_written = true;
        }
    }

    pub fn end_sdes_chunk(&mut self) {
        assert!(self.state == State::SdesChunk, "rtcp builder: wrong call order");
        assert!(
            self.cname_written,
            "rtcp builder: each SDES chunk should have exactly one CNAME item"
        );

        // Terminating zero item plus alignment to a 32-bit boundary.
        if self.ok {
            let pad = padding_len(self.buf.len() - self.packet_start, 1);
            let _ = self.extend(pad);
        }

        self.state = State::SdesHead;
    }

    pub fn end_sdes(&mut self) {
        assert!(self.state == State::SdesHead, "rtcp builder: wrong call order");

        self.end_packet();
    }

    //
    // Goodbye
    //

    pub fn begin_bye(&mut self) {
        assert!(self.state == State::Top, "rtcp builder: wrong call order");
        assert!(
            self.report_written,
            "rtcp builder: first packet should be SR or RR"
        );

        self.begin_packet(RTCP_BYE);
        self.state = State::ByeHead;
    }

    pub fn add_bye_ssrc(&mut self, ssrc: u32) {
        assert!(
            self.state == State::ByeHead || self.state == State::ByeSsrc,
            "rtcp builder: wrong call order"
        );

        if let Some(off) = self.extend(4) {
            NetworkEndian::write_u32(&mut self.buf[off..], ssrc);
            self.inc_counter();
        }

        self.state = State::ByeSsrc;
    }

    pub fn add_bye_reason(&mut self, reason: &str) {
        assert!(self.state == State::ByeSsrc, "rtcp builder: wrong call order");
        assert!(
            reason.len() <= MAX_TEXT_LEN,
            "rtcp builder: BYE reason too long"
        );

        let text = reason.as_bytes();
        let pad = padding_len(1 + text.len(), 0);
        if let Some(off) = self.extend(1 + text.len() + pad) {
            self.buf[off] = text.len() as u8;
            self.buf[off + 1..off + 1 + text.len()].copy_from_slice(text);
        }

        self.state = State::ByeReason;
    }

    pub fn end_bye(&mut self) {
        assert!(
            self.state == State::ByeSsrc || self.state == State::ByeReason,
            "rtcp builder: wrong call order"
        );

        self.end_packet();
    }

    //
    // Padding
    //

    /// Add padding to the last sub-packet. Must be a multiple of 4 in
    /// [4; 252] and must be the last call before `finish`.
    pub fn add_padding(&mut self, padding_len: usize) {
        assert!(
            self.state == State::Top && self.buf.len() > 0,
            "rtcp builder: wrong call order"
        );
        assert!(
            padding_len % 4 == 0 && padding_len >= 4 && padding_len <= 252,
            "rtcp builder: bad packet padding: should be multiple of 4 in range [4; 252], got {padding_len}"
        );

        if let Some(off) = self.extend(padding_len) {
            self.buf[off + padding_len - 1] = padding_len as u8;
            // set P bit and account for the bytes in the length field
            self.buf[self.packet_start] |= 0x20;
            let len = self.buf.len() - self.packet_start;
            NetworkEndian::write_u16(
                &mut self.buf[self.packet_start + 2..],
                (len / 4 - 1) as u16,
            );
        }

        self.state = State::End;
    }

    //
    // Internals
    //

    fn begin_packet(&mut self, packet_type: u8) {
        if !self.ok {
            return;
        }
        self.packet_start = self.buf.len();
        if let Some(off) = self.extend(HEADER_SIZE) {
            self.buf[off] = VERSION << 6;
            self.buf[off + 1] = packet_type;
        }
    }

    fn end_packet(&mut self) {
        if self.ok {
            let len = self.buf.len() - self.packet_start;
            debug_assert!(len % 4 == 0);
            NetworkEndian::write_u16(
                &mut self.buf[self.packet_start + 2..],
                (len / 4 - 1) as u16,
            );
        }
        self.state = State::Top;
    }

    fn add_reception_report(&mut self, report: &ReceptionReport) {
        if let Some(off) = self.extend(24) {
            NetworkEndian::write_u32(&mut self.buf[off..], report.ssrc);
            let cum_loss = report.cum_loss.clamp(-(1 << 23), (1 << 23) - 1) as u32 & 0x00FF_FFFF;
            NetworkEndian::write_u32(&mut self.buf[off + 4..], cum_loss);
            self.buf[off + 4] = report.fraction_lost;
            NetworkEndian::write_u32(&mut self.buf[off + 8..], report.last_seqnum);
            NetworkEndian::write_u32(&mut self.buf[off + 12..], report.jitter);
            NetworkEndian::write_u32(&mut self.buf[off + 16..], report.last_sr);
            NetworkEndian::write_u32(&mut self.buf[off + 20..], report.delay_last_sr);
            self.inc_counter();
        }
    }

    fn write_xr_block_header(&mut self, off: usize, block_type: u8, block_len: usize) {
        self.buf[off] = block_type;
        NetworkEndian::write_u16(&mut self.buf[off + 2..], (block_len / 4 - 1) as u16);
    }

    fn inc_counter(&mut self) {
        let counter = (self.buf[self.packet_start] & 0x1F) + 1;
        assert!(
            counter as usize <= PACKET_MAX_BLOCKS,
            "rtcp builder: too many blocks in one packet"
        );
        self.buf[self.packet_start] = (self.buf[self.packet_start] & !0x1F) | counter;
    }

    /// Reserve `size` zeroed bytes, or clear the `ok` flag and roll the
    /// current sub-packet back if the limit would be exceeded.
    fn extend(&mut self, size: usize) -> Option<usize> {
        if !self.ok {
            return None;
        }
        if self.buf.len() + size > self.limit {
            self.ok = false;
            self.buf.truncate(self.packet_start);
            return None;
        }
        let off = self.buf.len();
        self.buf.resize(off + size, 0);
        Some(off)
    }
}
