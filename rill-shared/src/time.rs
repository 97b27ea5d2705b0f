//! Nanosecond time arithmetic and NTP timestamp conversions.
//!
//! The whole core is time-driven: callers pass the current time into
//! `refresh()`-style entry points, and no component reads a clock on
//! its own. Times are nanoseconds since Unix epoch, signed so that
//! differences are well-formed.

/// Nanoseconds since Unix epoch, or a nanosecond duration.
pub type Nanos = i64;

pub const NANOSECOND: Nanos = 1;
pub const MICROSECOND: Nanos = 1_000;
pub const MILLISECOND: Nanos = 1_000_000;
pub const SECOND: Nanos = 1_000_000_000;

/// Offset in seconds between the Unix epoch (1970) and the NTP epoch (1900).
const NTP_UNIX_OFFSET: u64 = 0x83AA_7E80;

/// Convert Unix nanoseconds to a 64-bit NTP timestamp (32.32 fixed point).
pub fn ntp_from_nanos(nanos: Nanos) -> u64 {
    let u = nanos.max(0) as u64;

    let mut s = u / SECOND as u64;
    s += NTP_UNIX_OFFSET;
    let mut f = u % SECOND as u64;
    f <<= 32;
    f /= SECOND as u64;
    s <<= 32;

    s | f
}

/// Convert a 64-bit NTP timestamp to Unix nanoseconds.
pub fn nanos_from_ntp(ntp: u64) -> Nanos {
    let s = (ntp >> 32).saturating_sub(NTP_UNIX_OFFSET);
    let mut f = ntp & 0xFFFF_FFFF;
    f *= SECOND as u64;
    f >>= 32;

    (s * SECOND as u64 + f) as Nanos
}

/// Truncate a 64-bit NTP timestamp to its middle 32 bits,
/// as used by the LSR/LRR fields of RTCP reports.
pub fn ntp_short(ntp: u64) -> u32 {
    (ntp >> 16) as u32
}

/// Restore a full 64-bit NTP timestamp from its middle 32 bits.
///
/// `reference` is a full timestamp known to be close to (and not earlier
/// than about 9 hours before) the truncated one, typically the current time.
pub fn ntp_restore(short: u32, reference: u64) -> u64 {
    let mut full = (reference & 0xFFFF_0000_0000_0000) | ((short as u64) << 16);
    // If the middle bits wrapped between the two timestamps, step the
    // high bits back by one wrap period.
    if full > reference && full - reference > (1u64 << 47) {
        full = full.wrapping_sub(1u64 << 48);
    }
    full
}

/// Convert a nanosecond duration to NTP 16.16 fixed-point seconds
/// (the DLSR/DLRR unit).
pub fn ntp_short_from_duration(nanos: Nanos) -> u32 {
    let n = nanos.max(0) as u64;
    ((n << 16) / SECOND as u64).min(u32::MAX as u64) as u32
}

/// Convert NTP 16.16 fixed-point seconds to a nanosecond duration.
pub fn duration_from_ntp_short(v: u32) -> Nanos {
    ((v as u64 * SECOND as u64) >> 16) as Nanos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntp_roundtrip() {
        let t = 1_700_000_000 * SECOND + 123_456_789;
        let ntp = ntp_from_nanos(t);
        let back = nanos_from_ntp(ntp);
        assert!((t - back).abs() < 2, "lost more than rounding: {t} vs {back}");
    }

    #[test]
    fn test_ntp_ordering() {
        let a = ntp_from_nanos(SECOND);
        let b = ntp_from_nanos(2 * SECOND);
        assert!(a < b);
    }

    #[test]
    fn test_ntp_short_restore() {
        let t = 1_700_000_000 * SECOND;
        let ntp = ntp_from_nanos(t);
        let short = ntp_short(ntp);
        let restored = ntp_restore(short, ntp_from_nanos(t + 2 * SECOND));
        // Restoration keeps the middle 32 bits and a plausible high part.
        assert_eq!(ntp_short(restored), short);
        let diff = nanos_from_ntp(restored) - t;
        assert!(diff.abs() < SECOND, "restored too far: {diff}");
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(ntp_short_from_duration(SECOND), 65536);
        assert_eq!(duration_from_ntp_short(65536), SECOND);
        assert_eq!(duration_from_ntp_short(32768), SECOND / 2);
    }
}
