//! Bit round-trip tests: everything the builder writes, the traverser
//! reads back unchanged.

use rtcp::header::*;
use rtcp::{Builder, ByeEvent, PacketEvent, SdesEvent, Traverser, XrBlockEvent};

fn sr() -> SenderReport {
    SenderReport {
        ssrc: 0x1111_2222,
        ntp_timestamp: 0xAABB_CCDD_EEFF_0011,
        rtp_timestamp: 0x3333_4444,
        packet_count: 1000,
        byte_count: 160_000,
    }
}

fn reception_report() -> ReceptionReport {
    ReceptionReport {
        ssrc: 0x5555_6666,
        fraction_lost: 77,
        cum_loss: -5,
        last_seqnum: 0x0001_FFFF,
        jitter: 4242,
        last_sr: 0x9999_AAAA,
        delay_last_sr: 65536,
    }
}

#[test]
fn test_sr_roundtrip() {
    let mut builder = Builder::new(1460);
    builder.begin_sr(&sr());
    builder.add_sr_report(&reception_report());
    builder.end_sr();
    builder.begin_sdes();
    builder.begin_sdes_chunk(&SdesChunk { ssrc: 0x1111_2222 });
    builder.add_sdes_item(&SdesItem::cname("sender@host"));
    builder.end_sdes_chunk();
    builder.end_sdes();
    assert!(builder.is_ok());
    let data = builder.finish();

    // total length is 4-byte aligned
    assert_eq!(data.len() % 4, 0);

    let mut traverser = Traverser::new(&data);
    assert!(traverser.parse());

    let mut events = traverser.iter();
    match events.next().unwrap() {
        PacketEvent::Sr(parsed_sr, reports) => {
            assert_eq!(parsed_sr, sr());
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0], reception_report());
        }
        _ => panic!("expected SR first"),
    }
    match events.next().unwrap() {
        PacketEvent::Sdes(sdes) => {
            let events: Vec<SdesEvent> = sdes.iter().collect();
            assert_eq!(events.len(), 2);
            match &events[0] {
                SdesEvent::Chunk(chunk) => assert_eq!(chunk.ssrc, 0x1111_2222),
                _ => panic!("expected chunk"),
            }
            match &events[1] {
                SdesEvent::Item(item) => {
                    assert_eq!(item.item_type, SDES_CNAME);
                    assert_eq!(item.text, "sender@host");
                }
                _ => panic!("expected item"),
            }
        }
        _ => panic!("expected SDES second"),
    }
    assert!(events.next().is_none());
}

#[test]
fn test_empty_rr_permitted() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 42 });
    builder.end_rr();
    let data = builder.finish();

    assert_eq!(data.len(), 8);

    let mut traverser = Traverser::new(&data);
    assert!(traverser.parse());
    match traverser.iter().next().unwrap() {
        PacketEvent::Rr(rr, reports) => {
            assert_eq!(rr.ssrc, 42);
            assert!(reports.is_empty());
        }
        _ => panic!("expected RR"),
    }
}

#[test]
fn test_xr_blocks_roundtrip() {
    let rrtr = XrRrtr {
        ntp_timestamp: 0x0102_0304_0506_0708,
    };
    let dlrr = XrDlrrReport {
        ssrc: 7,
        last_rr: 0x1111_0000,
        delay_last_rr: 32768,
    };
    let info = XrMeasurementInfo {
        ssrc: 8,
        first_seq: 100,
        interval_first_seq: 0x0001_0064,
        interval_last_seq: 0x0001_0164,
        interval_duration: 123,
        cum_duration: 456,
    };
    let delay = XrDelayMetrics {
        ssrc: 9,
        mean_rtt: 11,
        min_rtt: 10,
        max_rtt: 12,
        e2e_latency: 777,
    };
    let queue = XrQueueMetrics {
        ssrc: 10,
        niq_latency: 2000,
        niq_stalling: 30,
    };

    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    builder.begin_xr(&XrHeader { ssrc: 1 });
    builder.add_xr_rrtr(&rrtr);
    builder.begin_xr_dlrr();
    builder.add_xr_dlrr_report(&dlrr);
    builder.add_xr_dlrr_report(&dlrr);
    builder.end_xr_dlrr();
    builder.add_xr_measurement_info(&info);
    builder.add_xr_delay_metrics(&delay);
    builder.add_xr_queue_metrics(&queue);
    builder.end_xr();
    assert!(builder.is_ok());
    let data = builder.finish();

    let mut traverser = Traverser::new(&data);
    assert!(traverser.parse());

    let mut saw_xr = false;
    for event in traverser.iter() {
        if let PacketEvent::Xr(xr) = event {
            saw_xr = true;
            assert_eq!(xr.ssrc(), 1);
            let blocks: Vec<XrBlockEvent> = xr.iter().collect();
            assert_eq!(blocks.len(), 5);
            match &blocks[0] {
                XrBlockEvent::Rrtr(parsed) => assert_eq!(*parsed, rrtr),
                _ => panic!("expected rrtr"),
            }
            match &blocks[1] {
                XrBlockEvent::Dlrr(reports) => assert_eq!(*reports, vec![dlrr, dlrr]),
                _ => panic!("expected dlrr"),
            }
            match &blocks[2] {
                XrBlockEvent::MeasurementInfo(parsed) => assert_eq!(*parsed, info),
                _ => panic!("expected measurement info"),
            }
            match &blocks[3] {
                XrBlockEvent::DelayMetrics(parsed) => assert_eq!(*parsed, delay),
                _ => panic!("expected delay metrics"),
            }
            match &blocks[4] {
                XrBlockEvent::QueueMetrics(parsed) => assert_eq!(*parsed, queue),
                _ => panic!("expected queue metrics"),
            }
        }
    }
    assert!(saw_xr);
}

#[test]
fn test_bye_roundtrip() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    builder.begin_bye();
    builder.add_bye_ssrc(0xDEAD_BEEF);
    builder.add_bye_reason("shutting down");
    builder.end_bye();
    let data = builder.finish();

    let mut traverser = Traverser::new(&data);
    assert!(traverser.parse());

    let mut saw_bye = false;
    for event in traverser.iter() {
        if let PacketEvent::Bye(bye) = event {
            saw_bye = true;
            assert_eq!(bye.ssrc_count(), 1);
            let events: Vec<ByeEvent> = bye.iter().collect();
            assert_eq!(events.len(), 2);
            match &events[0] {
                ByeEvent::Ssrc(ssrc) => assert_eq!(*ssrc, 0xDEAD_BEEF),
                _ => panic!("expected ssrc"),
            }
            match &events[1] {
                ByeEvent::Reason(reason) => assert_eq!(reason, "shutting down"),
                _ => panic!("expected reason"),
            }
        }
    }
    assert!(saw_bye);
}

#[test]
fn test_padding_rules() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    builder.add_padding(8);
    let data = builder.finish();

    // last byte holds the padding length, preceding padding is zero
    assert_eq!(data[data.len() - 1], 8);
    assert_eq!(data[data.len() - 2], 0);
    // P bit set
    assert!(data[0] & 0x20 != 0);

    let mut traverser = Traverser::new(&data);
    assert!(traverser.parse());
}

#[test]
fn test_padding_not_on_last_rejected() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    builder.add_padding(4);
    let mut data = builder.finish();

    // append another RR after the padded packet
    let mut more = Builder::new(1460);
    more.begin_rr(&ReceiverReport { ssrc: 2 });
    more.end_rr();
    data.extend_from_slice(&more.finish());

    let mut traverser = Traverser::new(&data);
    assert!(!traverser.parse());
}

#[test]
fn test_first_packet_must_be_report() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    builder.begin_sdes();
    builder.begin_sdes_chunk(&SdesChunk { ssrc: 1 });
    builder.add_sdes_item(&SdesItem::cname("x"));
    builder.end_sdes_chunk();
    builder.end_sdes();
    let data = builder.finish();

    // drop the leading RR: SDES alone must be rejected
    let mut traverser = Traverser::new(&data[8..]);
    assert!(!traverser.parse());
}

#[test]
fn test_bad_version_rejected() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    let mut data = builder.finish();
    data[0] = (data[0] & 0x3F) | (1 << 6);

    let mut traverser = Traverser::new(&data);
    assert!(!traverser.parse());
}

#[test]
fn test_bad_length_rejected() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    let mut data = builder.finish();
    // declare a length beyond the buffer
    data[3] = 40;

    let mut traverser = Traverser::new(&data);
    assert!(!traverser.parse());
}

#[test]
fn test_unknown_type_skipped() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    let mut data = builder.finish();

    // append a well-formed APP packet
    data.extend_from_slice(&[0x80, 204, 0x00, 0x02, 0, 0, 0, 1, b'n', b'a', b'm', b'e']);

    let mut traverser = Traverser::new(&data);
    assert!(traverser.parse());
    let events: Vec<PacketEvent<'_>> = traverser.iter().collect();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], PacketEvent::Rr(..)));
}

#[test]
fn test_truncation_on_overflow() {
    // Room for the RR but not for the SDES.
    let mut builder = Builder::new(12);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    assert!(builder.is_ok());

    builder.begin_sdes();
    builder.begin_sdes_chunk(&SdesChunk { ssrc: 1 });
    builder.add_sdes_item(&SdesItem::cname("someone@somewhere"));
    builder.end_sdes_chunk();
    builder.end_sdes();
    assert!(!builder.is_ok());

    // what fit is still a valid compound packet
    let data = builder.finish();
    assert_eq!(data.len(), 8);
    let mut traverser = Traverser::new(&data);
    assert!(traverser.parse());
}

#[test]
#[should_panic(expected = "wrong call order")]
fn test_misuse_panics() {
    let mut builder = Builder::new(1460);
    builder.end_sr();
}

#[test]
#[should_panic(expected = "exactly one CNAME")]
fn test_chunk_without_cname_panics() {
    let mut builder = Builder::new(1460);
    builder.begin_rr(&ReceiverReport { ssrc: 1 });
    builder.end_rr();
    builder.begin_sdes();
    builder.begin_sdes_chunk(&SdesChunk { ssrc: 1 });
    builder.end_sdes_chunk();
}
