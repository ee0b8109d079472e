//! Anchor transform wire codec
//!
//! A precise anchor transform is persisted as a 4x4 matrix of 32-bit IEEE-754 floats,
//! serialized column-major (16 floats, 64 bytes, little-endian) and then base64 encoded.
//! Existing stored payloads depend on this layout, so it must stay bit-exact.

use crate::core::{AnchorOffset, ANCHOR_TRANSFORM_BYTES};
use crate::validation::error::{GeoAnchorError, GeoAnchorResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use nalgebra::{Matrix4, Vector3};

/// Decoded anchor transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorTransform {
    matrix: Matrix4<f32>,
}

impl AnchorTransform {
    pub fn new(matrix: Matrix4<f32>) -> GeoAnchorResult<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(GeoAnchorError::NonFiniteValue { field: "anchor_transform" });
        }
        Ok(Self { matrix })
    }

    /// Pure translation transform
    pub fn from_translation(x: f32, y: f32, z: f32) -> GeoAnchorResult<Self> {
        Self::new(Matrix4::new_translation(&Vector3::new(x, y, z)))
    }

    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.matrix
    }

    /// Translation column as an ENU offset
    pub fn translation(&self) -> AnchorOffset {
        AnchorOffset::new(
            self.matrix[(0, 3)] as f64,
            self.matrix[(1, 3)] as f64,
            self.matrix[(2, 3)] as f64,
        )
    }

    /// Raw column-major little-endian bytes
    pub fn to_bytes(&self) -> [u8; ANCHOR_TRANSFORM_BYTES] {
        let mut bytes = [0u8; ANCHOR_TRANSFORM_BYTES];
        // nalgebra stores matrices column-major, so iteration order is the wire order
        for (chunk, value) in bytes.chunks_exact_mut(4).zip(self.matrix.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> GeoAnchorResult<Self> {
        if bytes.len() != ANCHOR_TRANSFORM_BYTES {
            return Err(GeoAnchorError::MalformedTransform {
                reason: format!(
                    "expected {} bytes, got {}",
                    ANCHOR_TRANSFORM_BYTES,
                    bytes.len()
                ),
            });
        }

        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Self::new(Matrix4::from_column_slice(&values))
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn decode(encoded: &str) -> GeoAnchorResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| GeoAnchorError::MalformedTransform {
                reason: format!("invalid base64: {}", e),
            })?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout_is_column_major() {
        let transform = AnchorTransform::from_translation(1.5, -2.0, 3.25).unwrap();
        let bytes = transform.to_bytes();

        // Translation lives in the fourth column: floats 12, 13, 14
        let read = |index: usize| {
            let start = index * 4;
            f32::from_le_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]])
        };
        assert_eq!(read(0), 1.0);
        assert_eq!(read(12), 1.5);
        assert_eq!(read(13), -2.0);
        assert_eq!(read(14), 3.25);
        assert_eq!(read(15), 1.0);
    }

    #[test]
    fn test_identity_encoding_is_stable() {
        let identity = AnchorTransform::new(Matrix4::identity()).unwrap();
        assert_eq!(
            identity.encode(),
            "AACAPwAAAAAAAAAAAAAAAAAAAAAAAIA/AAAAAAAAAAAAAAAAAAAAAAAAgD8AAAAAAAAAAAAAAAAAAAAAAACAPw=="
        );
    }

    #[test]
    fn test_decode_preserves_translation() {
        let encoded = AnchorTransform::from_translation(12.345, 0.5, -7.75)
            .unwrap()
            .encode();
        let decoded = AnchorTransform::decode(&encoded).unwrap();
        let t = decoded.translation();
        assert_eq!(t.x, 12.345f32 as f64);
        assert_eq!(t.y, 0.5);
        assert_eq!(t.z, -7.75);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let short = STANDARD.encode([0u8; 60]);
        assert!(matches!(
            AnchorTransform::decode(&short),
            Err(GeoAnchorError::MalformedTransform { .. })
        ));
        let long = STANDARD.encode([0u8; 68]);
        assert!(AnchorTransform::decode(&long).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage_and_nan() {
        assert!(AnchorTransform::decode("not base64 at all!").is_err());

        let mut bytes = AnchorTransform::new(Matrix4::identity()).unwrap().to_bytes();
        bytes[48..52].copy_from_slice(&f32::NAN.to_le_bytes());
        assert!(matches!(
            AnchorTransform::from_bytes(&bytes),
            Err(GeoAnchorError::NonFiniteValue { .. })
        ));
    }
}
