use super::{DecodeError, PacketDecoder};
use std::collections::HashMap;

/// Maximum number of head/eye transform floats in a text packet
pub const MAX_TRANSFORM_FLOATS: usize = 12;

/// Default blend shape order (ARKit face tracking)
pub const ARKIT_BLENDSHAPES: [&str; 52] = [
    "eyeBlinkLeft",
    "eyeLookDownLeft",
    "eyeLookInLeft",
    "eyeLookOutLeft",
    "eyeLookUpLeft",
    "eyeSquintLeft",
    "eyeWideLeft",
    "eyeBlinkRight",
    "eyeLookDownRight",
    "eyeLookInRight",
    "eyeLookOutRight",
    "eyeLookUpRight",
    "eyeSquintRight",
    "eyeWideRight",
    "jawForward",
    "jawLeft",
    "jawRight",
    "jawOpen",
    "mouthClose",
    "mouthFunnel",
    "mouthPucker",
    "mouthLeft",
    "mouthRight",
    "mouthSmileLeft",
    "mouthSmileRight",
    "mouthFrownLeft",
    "mouthFrownRight",
    "mouthDimpleLeft",
    "mouthDimpleRight",
    "mouthStretchLeft",
    "mouthStretchRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthPressLeft",
    "mouthPressRight",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
    "browDownLeft",
    "browDownRight",
    "browInnerUp",
    "browOuterUpLeft",
    "browOuterUpRight",
    "cheekPuff",
    "cheekSquintLeft",
    "cheekSquintRight",
    "noseSneerLeft",
    "noseSneerRight",
    "tongueOut",
];

/// Decoder for `name&value|name&value|=head#f,f,f,f,f,f|rightEye#f,f,f|...`
///
/// Output layout: one value per configured blend shape (in configured order,
/// 0 when absent from the packet), followed by `transform_len` floats.
/// Blend shapes not in the layout are ignored.
pub struct TextDecoder {
    names: Vec<String>,
    index: HashMap<String, usize>,
    transform_len: usize,
}

impl TextDecoder {
    pub fn new(names: Vec<String>, transform_len: usize) -> Self {
        assert!(
            transform_len <= MAX_TRANSFORM_FLOATS,
            "text packets carry at most {} transform floats",
            MAX_TRANSFORM_FLOATS
        );
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            index,
            transform_len,
        }
    }

    /// ARKit layout with head (6) and both eyes (3 + 3)
    pub fn arkit() -> Self {
        Self::new(
            ARKIT_BLENDSHAPES.iter().map(|s| s.to_string()).collect(),
            MAX_TRANSFORM_FLOATS,
        )
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn parse_blendshapes(&self, segment: &str, out: &mut [f32]) -> Result<(), DecodeError> {
        for item in segment.split('|').filter(|item| !item.is_empty()) {
            let mut fields = item.split('&');
            let (name, value) = match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(value), None) if !name.is_empty() => (name, value),
                _ => return Err(DecodeError::MalformedPair(item.to_string())),
            };
            let value = parse_float(value)?;
            if let Some(&slot) = self.index.get(name) {
                out[slot] = value;
            }
        }
        Ok(())
    }

    fn parse_transforms(&self, segment: &str, out: &mut Vec<f32>) -> Result<(), DecodeError> {
        for group in segment.split('|').filter(|group| !group.is_empty()) {
            // Drop an optional "head#" style label
            let floats = match group.split_once('#') {
                Some((_, rest)) => rest,
                None => group,
            };
            for field in floats.split(',').filter(|f| !f.trim().is_empty()) {
                out.push(parse_float(field)?);
            }
        }

        if out.len() != self.transform_len {
            return Err(DecodeError::FloatCount {
                expected: self.transform_len,
                found: out.len(),
            });
        }
        Ok(())
    }
}

impl PacketDecoder for TextDecoder {
    fn decode(&self, datagram: &[u8]) -> Result<Vec<f32>, DecodeError> {
        let text = std::str::from_utf8(datagram).map_err(|_| DecodeError::NotUtf8)?;
        let text = text.trim();

        let segments: Vec<&str> = text.split('=').collect();
        if segments.len() != 2 {
            return Err(DecodeError::SegmentCount(segments.len()));
        }

        let mut blend = vec![0.0; self.names.len()];
        self.parse_blendshapes(segments[0], &mut blend)?;

        let mut transforms = Vec::with_capacity(self.transform_len);
        self.parse_transforms(segments[1], &mut transforms)?;

        blend.extend(transforms);
        Ok(blend)
    }

    fn frame_len(&self) -> usize {
        self.names.len() + self.transform_len
    }
}

fn parse_float(field: &str) -> Result<f32, DecodeError> {
    let field = field.trim();
    match field.parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(DecodeError::NotNumeric(field.to_string())),
    }
}

/// Format a text packet the way a tracking peer sends it
///
/// `transforms` are grouped as head (6), right eye (3), left eye (3); any
/// remainder goes into the last group.
pub fn encode_text_packet(blendshapes: &[(&str, f32)], transforms: &[f32]) -> String {
    let mut packet = String::new();
    for (name, value) in blendshapes {
        packet.push_str(&format!("{}&{}|", name, value));
    }
    packet.push('=');

    let groups = [("head", 6usize), ("rightEye", 3), ("leftEye", 3)];
    let mut rest = transforms;
    for (i, (label, size)) in groups.iter().enumerate() {
        if rest.is_empty() {
            break;
        }
        let take = if i == groups.len() - 1 { rest.len() } else { (*size).min(rest.len()) };
        let (chunk, tail) = rest.split_at(take);
        let fields: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
        packet.push_str(&format!("{}#{}|", label, fields.join(",")));
        rest = tail;
    }
    packet
}
