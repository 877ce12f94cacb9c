use super::{DecodeError, PacketDecoder};

pub const HEAD_FLOATS: usize = 16;
pub const HAND_JOINTS: usize = 21;
pub const JOINT_FLOATS: usize = 3;
pub const BLEND_SHAPES: usize = 52;

/// Floats carried per packet (version excluded)
pub const FLOAT_COUNT: usize = HEAD_FLOATS + 2 * HAND_JOINTS * JOINT_FLOATS + BLEND_SHAPES;

/// Exact datagram size: u32 version + floats, little-endian, no padding
pub const PACKET_SIZE: usize = 4 + FLOAT_COUNT * 4;

/// Current packet layout version
pub const PACKET_VERSION: u32 = 1;

/// Fixed-size binary motion packet
#[derive(Clone, Debug, PartialEq)]
pub struct BinaryPacket {
    pub version: u32,
    /// Column-major 4x4 head transform
    pub head: [f32; HEAD_FLOATS],
    pub left_hand: [[f32; JOINT_FLOATS]; HAND_JOINTS],
    pub right_hand: [[f32; JOINT_FLOATS]; HAND_JOINTS],
    pub blend_shapes: [f32; BLEND_SHAPES],
}

impl Default for BinaryPacket {
    fn default() -> Self {
        let mut head = [0.0; HEAD_FLOATS];
        // Identity
        for i in 0..4 {
            head[i * 5] = 1.0;
        }
        Self {
            version: PACKET_VERSION,
            head,
            left_hand: [[0.0; JOINT_FLOATS]; HAND_JOINTS],
            right_hand: [[0.0; JOINT_FLOATS]; HAND_JOINTS],
            blend_shapes: [0.0; BLEND_SHAPES],
        }
    }
}

impl BinaryPacket {
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != PACKET_SIZE {
            return Err(DecodeError::Length {
                expected: PACKET_SIZE,
                found: bytes.len(),
            });
        }

        let (version, body) = bytes.split_at(4);
        if let Some(index) = body
            .chunks_exact(4)
            .position(|c| !f32::from_le_bytes([c[0], c[1], c[2], c[3]]).is_finite())
        {
            return Err(DecodeError::NonFinite(index));
        }
        let version = u32::from_le_bytes([version[0], version[1], version[2], version[3]]);
        let mut floats = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));

        let mut packet = BinaryPacket {
            version,
            ..BinaryPacket::default()
        };
        for slot in packet.head.iter_mut() {
            *slot = floats.next().unwrap_or(0.0);
        }
        for joint in packet.left_hand.iter_mut().chain(packet.right_hand.iter_mut()) {
            for slot in joint.iter_mut() {
                *slot = floats.next().unwrap_or(0.0);
            }
        }
        for slot in packet.blend_shapes.iter_mut() {
            *slot = floats.next().unwrap_or(0.0);
        }
        Ok(packet)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PACKET_SIZE);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        for value in self.to_values() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// Flatten in wire order: head, left hand, right hand, blend shapes
    pub fn to_values(&self) -> Vec<f32> {
        let mut values = Vec::with_capacity(FLOAT_COUNT);
        values.extend_from_slice(&self.head);
        for joint in self.left_hand.iter().chain(self.right_hand.iter()) {
            values.extend_from_slice(joint);
        }
        values.extend_from_slice(&self.blend_shapes);
        values
    }
}

pub struct BinaryDecoder;

impl PacketDecoder for BinaryDecoder {
    fn decode(&self, datagram: &[u8]) -> Result<Vec<f32>, DecodeError> {
        BinaryPacket::parse(datagram).map(|packet| packet.to_values())
    }

    fn frame_len(&self) -> usize {
        FLOAT_COUNT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_size() {
        assert_eq!(FLOAT_COUNT, 194);
        assert_eq!(PACKET_SIZE, 780);
        assert_eq!(BinaryPacket::default().to_bytes().len(), PACKET_SIZE);
    }

    #[test]
    fn test_decodes_fields_in_wire_order() {
        let mut packet = BinaryPacket::default();
        packet.head[12] = 0.25;
        packet.right_hand[20] = [1.0, 2.0, 3.0];
        packet.blend_shapes[51] = 0.75;

        let values = BinaryDecoder.decode(&packet.to_bytes()).unwrap();
        assert_eq!(values.len(), FLOAT_COUNT);
        assert_eq!(values[12], 0.25);
        let right_last = HEAD_FLOATS + (2 * HAND_JOINTS - 1) * JOINT_FLOATS;
        assert_eq!(&values[right_last..right_last + 3], &[1.0, 2.0, 3.0]);
        assert_eq!(values[FLOAT_COUNT - 1], 0.75);
    }

    #[test]
    fn test_version_is_little_endian() {
        let mut bytes = BinaryPacket::default().to_bytes();
        bytes[..4].copy_from_slice(&[7, 0, 0, 0]);
        assert_eq!(BinaryPacket::parse(&bytes).unwrap().version, 7);
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let bytes = BinaryPacket::default().to_bytes();
        assert_eq!(
            BinaryDecoder.decode(&bytes[..PACKET_SIZE - 1]),
            Err(DecodeError::Length {
                expected: PACKET_SIZE,
                found: PACKET_SIZE - 1
            })
        );

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(BinaryDecoder.decode(&longer).is_err());
    }

    #[test]
    fn test_rejects_non_finite_floats() {
        let mut packet = BinaryPacket::default();
        packet.head[3] = f32::NAN;
        assert_eq!(
            BinaryDecoder.decode(&packet.to_bytes()),
            Err(DecodeError::NonFinite(3))
        );

        let mut packet = BinaryPacket::default();
        packet.blend_shapes[0] = f32::INFINITY;
        let index = FLOAT_COUNT - BLEND_SHAPES;
        assert_eq!(
            BinaryDecoder.decode(&packet.to_bytes()),
            Err(DecodeError::NonFinite(index))
        );
    }
}
