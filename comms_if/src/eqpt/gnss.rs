//! # GNSS equipment

use serde::{Deserialize, Serialize};

/// A raw NMEA sentence stamped with the authoritative timestamp on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GnssLine {
    pub timestamp_ns: u64,
    pub sentence: String,
}

/// Check the `*hh` checksum of an NMEA sentence.
///
/// Sentences without a checksum field are accepted.
pub fn nmea_checksum_ok(sentence: &str) -> bool {
    let body = sentence.trim().trim_start_matches('$');

    let (data, sum) = match body.rfind('*') {
        Some(i) => (&body[..i], &body[i + 1..]),
        None => return true,
    };

    let expected = match u8::from_str_radix(sum, 16) {
        Ok(e) => e,
        Err(_) => return false,
    };

    data.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_nmea_checksum() {
        assert!(nmea_checksum_ok(
            "$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*76"
        ));
        assert!(!nmea_checksum_ok(
            "$GPGGA,092750.000,5321.6802,N,00630.3372,W,1,8,1.03,61.7,M,55.2,M,,*77"
        ));
        assert!(nmea_checksum_ok("$GPTXT,no checksum"));
        assert!(!nmea_checksum_ok("$GPTXT,bad*zz"));
    }
}
