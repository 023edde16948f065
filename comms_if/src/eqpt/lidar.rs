//! # LiDAR equipment
//!
//! Records produced by the LiDAR client, and the fixed-layout datagram the
//! LiDAR bridge sends to it.
//!
//! # Datagram layout
//!
//! All fields are little endian.
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 2 | magic, `0x5352` |
//! | 2 | 1 | version, `1` |
//! | 3 | 1 | kind, `0` points or `1` imu |
//! | 4 | 16 | serial number, ASCII, NUL padded |
//! | 20 | 8 | sensor timestamp of the first sample (ns) |
//! | 28 | 2 | number of samples |
//! | 30 | .. | samples |
//!
//! A point sample is `x, y, z: i32` (mm), `reflectivity: u8`, `tag: u8`,
//! `offset_ns: u32`. An IMU sample is `gyro: [f32; 3]`, `acc: [f32; 3]`,
//! `offset_ns: u32`. Sample offsets are relative to the packet timestamp.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const PACKET_MAGIC: u16 = 0x5352;

pub const PACKET_VERSION: u8 = 1;

pub const SERIAL_LEN: usize = 16;

pub const HEADER_LEN: usize = 30;

const POINT_LEN: usize = 18;

const IMU_LEN: usize = 28;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A point with its authoritative timestamp.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LidarPoint {
    pub x_mm: i32,
    pub y_mm: i32,
    pub z_mm: i32,
    pub reflectivity: u8,
    pub tag: u8,
    pub timestamp_ns: u64,
    pub lidar_id: u16,
}

/// An IMU sample with its authoritative timestamp.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub gyro: [f32; 3],
    pub acc: [f32; 3],
    pub timestamp_ns: u64,
    pub lidar_id: u16,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RawPoint {
    pub x_mm: i32,
    pub y_mm: i32,
    pub z_mm: i32,
    pub reflectivity: u8,
    pub tag: u8,
    pub offset_ns: u32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RawImu {
    pub gyro: [f32; 3],
    pub acc: [f32; 3],
    pub offset_ns: u32,
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct LidarPacket {
    pub serial: String,

    /// Sensor clock time of the first sample
    pub timestamp_ns: u64,

    pub payload: LidarPayload,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum LidarPayload {
    Points(Vec<RawPoint>),
    Imu(Vec<RawImu>),
}

#[derive(Debug, thiserror::Error)]
pub enum LidarPacketError {
    #[error("Packet is too short ({0} bytes)")]
    TooShort(usize),

    #[error("Packet has a bad magic number ({0:#06x})")]
    BadMagic(u16),

    #[error("Unsupported packet version {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown packet kind {0}")]
    UnknownKind(u8),

    #[error("Packet declares {expected} bytes of samples but carries {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Could not read packet: {0}")]
    Io(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LidarPacket {
    /// Decode a datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, LidarPacketError> {
        if buf.len() < HEADER_LEN {
            return Err(LidarPacketError::TooShort(buf.len()));
        }

        let mut rdr = Cursor::new(buf);

        let magic = rdr.read_u16::<LittleEndian>()?;
        if magic != PACKET_MAGIC {
            return Err(LidarPacketError::BadMagic(magic));
        }

        let version = rdr.read_u8()?;
        if version != PACKET_VERSION {
            return Err(LidarPacketError::UnsupportedVersion(version));
        }

        let kind = rdr.read_u8()?;

        let mut serial_raw = [0u8; SERIAL_LEN];
        rdr.read_exact(&mut serial_raw)?;
        let serial = String::from_utf8_lossy(&serial_raw)
            .trim_end_matches('\0')
            .to_string();

        let timestamp_ns = rdr.read_u64::<LittleEndian>()?;
        let count = rdr.read_u16::<LittleEndian>()? as usize;

        let sample_len = match kind {
            0 => POINT_LEN,
            1 => IMU_LEN,
            k => return Err(LidarPacketError::UnknownKind(k)),
        };

        let actual = buf.len() - HEADER_LEN;
        if actual != count * sample_len {
            return Err(LidarPacketError::LengthMismatch {
                expected: count * sample_len,
                actual,
            });
        }

        let payload = if kind == 0 {
            let mut points = Vec::with_capacity(count);
            for _ in 0..count {
                points.push(RawPoint {
                    x_mm: rdr.read_i32::<LittleEndian>()?,
                    y_mm: rdr.read_i32::<LittleEndian>()?,
                    z_mm: rdr.read_i32::<LittleEndian>()?,
                    reflectivity: rdr.read_u8()?,
                    tag: rdr.read_u8()?,
                    offset_ns: rdr.read_u32::<LittleEndian>()?,
                });
            }
            LidarPayload::Points(points)
        } else {
            let mut samples = Vec::with_capacity(count);
            for _ in 0..count {
                let mut vals = [0f32; 6];
                for v in vals.iter_mut() {
                    *v = rdr.read_f32::<LittleEndian>()?;
                }
                samples.push(RawImu {
                    gyro: [vals[0], vals[1], vals[2]],
                    acc: [vals[3], vals[4], vals[5]],
                    offset_ns: rdr.read_u32::<LittleEndian>()?,
                });
            }
            LidarPayload::Imu(samples)
        };

        Ok(Self {
            serial,
            timestamp_ns,
            payload,
        })
    }

    /// Encode the packet into a datagram. Serials longer than
    /// [`SERIAL_LEN`] are truncated.
    pub fn encode(&self) -> Vec<u8> {
        let (kind, count) = match &self.payload {
            LidarPayload::Points(p) => (0u8, p.len()),
            LidarPayload::Imu(s) => (1u8, s.len()),
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + count * POINT_LEN.max(IMU_LEN));

        // Writes into a Vec can't fail
        let _ = buf.write_u16::<LittleEndian>(PACKET_MAGIC);
        let _ = buf.write_u8(PACKET_VERSION);
        let _ = buf.write_u8(kind);

        let mut serial_raw = [0u8; SERIAL_LEN];
        for (dst, src) in serial_raw.iter_mut().zip(self.serial.bytes()) {
            *dst = src;
        }
        buf.extend_from_slice(&serial_raw);

        let _ = buf.write_u64::<LittleEndian>(self.timestamp_ns);
        let _ = buf.write_u16::<LittleEndian>(count as u16);

        match &self.payload {
            LidarPayload::Points(points) => {
                for p in points {
                    let _ = buf.write_i32::<LittleEndian>(p.x_mm);
                    let _ = buf.write_i32::<LittleEndian>(p.y_mm);
                    let _ = buf.write_i32::<LittleEndian>(p.z_mm);
                    let _ = buf.write_u8(p.reflectivity);
                    let _ = buf.write_u8(p.tag);
                    let _ = buf.write_u32::<LittleEndian>(p.offset_ns);
                }
            }
            LidarPayload::Imu(samples) => {
                for s in samples {
                    for v in s.gyro.iter().chain(s.acc.iter()) {
                        let _ = buf.write_f32::<LittleEndian>(*v);
                    }
                    let _ = buf.write_u32::<LittleEndian>(s.offset_ns);
                }
            }
        }

        buf
    }

    /// Number of samples carried by the packet.
    pub fn len(&self) -> usize {
        match &self.payload {
            LidarPayload::Points(p) => p.len(),
            LidarPayload::Imu(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<std::io::Error> for LidarPacketError {
    fn from(e: std::io::Error) -> Self {
        LidarPacketError::Io(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn point_packet() -> LidarPacket {
        LidarPacket {
            serial: "3GGDJ6K00100011".into(),
            timestamp_ns: 1_000_000,
            payload: LidarPayload::Points(vec![
                RawPoint {
                    x_mm: 1000,
                    y_mm: -250,
                    z_mm: 30,
                    reflectivity: 12,
                    tag: 0,
                    offset_ns: 0,
                },
                RawPoint {
                    x_mm: 1001,
                    y_mm: -251,
                    z_mm: 31,
                    reflectivity: 200,
                    tag: 1,
                    offset_ns: 10_000,
                },
            ]),
        }
    }

    #[test]
    fn test_decode_points() {
        let pkt = point_packet();
        let buf = pkt.encode();
        assert_eq!(buf.len(), HEADER_LEN + 2 * POINT_LEN);

        let decoded = LidarPacket::decode(&buf).unwrap();
        assert_eq!(decoded.serial, "3GGDJ6K00100011");
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn test_decode_errors() {
        let mut buf = point_packet().encode();

        match LidarPacket::decode(&buf[..10]) {
            Err(LidarPacketError::TooShort(10)) => (),
            r => panic!("Expected TooShort, got {:?}", r),
        }

        match LidarPacket::decode(&buf[..buf.len() - 1]) {
            Err(LidarPacketError::LengthMismatch { .. }) => (),
            r => panic!("Expected LengthMismatch, got {:?}", r),
        }

        buf[3] = 7;
        match LidarPacket::decode(&buf) {
            Err(LidarPacketError::UnknownKind(7)) => (),
            r => panic!("Expected UnknownKind, got {:?}", r),
        }

        buf[0] = 0;
        match LidarPacket::decode(&buf) {
            Err(LidarPacketError::BadMagic(_)) => (),
            r => panic!("Expected BadMagic, got {:?}", r),
        }
    }
}
