//! Text codec shared by every scalar field in a model artifact.

use crate::error::{Result, TwpipeError};

/// Encodes a hyperparameter value as it is stored in the artifact.
pub fn encode_scalar(value: u32) -> String {
    value.to_string()
}

/// Decodes a stored hyperparameter value.
///
/// Only a non-empty run of ASCII digits that fits in a `u32` is accepted;
/// signs, whitespace and fractions are rejected.
pub fn decode_scalar(namespace: &str, field: &str, raw: &str) -> Result<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TwpipeError::corrupt(
            namespace,
            format!("field {field:?} is not an unsigned integer: {raw:?}"),
        ));
    }
    raw.parse::<u32>().map_err(|e| {
        TwpipeError::corrupt(namespace, format!("field {field:?} out of range ({raw:?}): {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_digits() {
        assert_eq!(decode_scalar("postagger", "char-dim", "16").unwrap(), 16);
        assert_eq!(decode_scalar("postagger", "char-dim", "0").unwrap(), 0);
        assert_eq!(
            decode_scalar("postagger", "char-dim", &encode_scalar(u32::MAX)).unwrap(),
            u32::MAX
        );
    }

    #[test]
    fn rejects_malformed_values() {
        for raw in ["", "+16", "-1", " 16", "16 ", "1.5", "sixteen", "4294967296"] {
            let err = decode_scalar("postagger", "char-dim", raw).unwrap_err();
            assert!(
                matches!(err, TwpipeError::CorruptModelArtifact { .. }),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn error_names_the_field() {
        let err = decode_scalar("tokenizer", "seg-dim", "x").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("tokenizer"));
        assert!(msg.contains("seg-dim"));
    }
}
