//! Server metadata embedded in client frames.
//!
//! A client announces which models it shares by sending an entry keyed
//! `"DServerMetaData:..."`. The entry is meant for the router only and is cut
//! out of the frame before anything is relayed.

use std::collections::BTreeSet;

use crate::scan::{closing_marker, find, find_byte};

pub const METADATA_MARKER: &[u8] = b"\"DServerMetaData:";

const SHARED_MODELS_PROPERTY: &[u8] = b"SHARED_MODELS\":";
const MODEL_MARKER: &[u8] = b"\"DModel:";
const ESCAPED_QUOTE: &[u8] = b"\\\"";

/// A frame with its metadata entry removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stripped {
    pub frame: Vec<u8>,
    /// Raw metadata text, starting just after the entry's opening quote.
    pub metadata: Option<Vec<u8>>,
}

impl Stripped {
    fn unchanged(frame: &[u8]) -> Self {
        Self {
            frame: frame.to_vec(),
            metadata: None,
        }
    }
}

/// Cut the metadata entry out of `frame`.
///
/// The entry runs from its key up to the closing brace of the object that
/// encloses it; that brace stays in the returned frame, so a frame carrying
/// nothing but metadata comes back as `{}`.
pub fn strip_metadata(frame: &[u8]) -> Stripped {
    let Some(start) = find(frame, METADATA_MARKER, 0) else {
        return Stripped::unchanged(frame);
    };
    let Some(key_end) = find_byte(frame, b'"', start + 2) else {
        return Stripped::unchanged(frame);
    };
    let end = closing_marker(frame, key_end + 2, b'{', b'}').min(frame.len());

    let metadata = frame[start + 1..end].to_vec();
    let mut rest = Vec::with_capacity(frame.len() - (end - start));
    rest.extend_from_slice(&frame[..start]);
    rest.extend_from_slice(&frame[end..]);

    Stripped {
        frame: rest,
        metadata: Some(metadata),
    }
}

/// Model ids listed under `SHARED_MODELS` in a metadata entry.
///
/// Returns `None` when the metadata does not mention shared models at all, in
/// which case the client's current set should be left alone.
pub fn parse_shared_models(metadata: &[u8]) -> Option<BTreeSet<String>> {
    let property = find(metadata, SHARED_MODELS_PROPERTY, 0)?;
    let mut models = BTreeSet::new();

    let list_from = property + SHARED_MODELS_PROPERTY.len() + 1;
    let Some(list_start) = find_byte(metadata, b'[', list_from) else {
        return Some(models);
    };
    let list_end = closing_marker(metadata, list_start + 1, b'[', b']')
        .clamp(list_start + 1, metadata.len());
    let elements = &metadata[list_start + 1..list_end];

    let mut cursor = 0;
    while let Some(model_start) = find(elements, MODEL_MARKER, cursor) {
        let Some(model_end) = find(elements, ESCAPED_QUOTE, model_start) else {
            break;
        };
        let id = String::from_utf8_lossy(&elements[model_start + 1..model_end]);
        models.insert(id.into_owned());
        cursor = model_end;
    }

    Some(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    const META_ONLY: &[u8] =
        br#"{"DServerMetaData:c1":{"SHARED_MODELS":"[\"DModel:r:m1\",\"DModel:r:m2\"]"}}"#;

    #[test]
    fn frame_without_metadata_is_untouched() {
        let frame = br#"{"DModel:r:m1":{"a":1}}"#;
        let stripped = strip_metadata(frame);
        assert_eq!(stripped.frame, frame.to_vec());
        assert!(stripped.metadata.is_none());
    }

    #[test]
    fn metadata_only_frame_strips_to_empty_object() {
        let stripped = strip_metadata(META_ONLY);
        assert_eq!(stripped.frame, b"{}".to_vec());

        let metadata = stripped.metadata.unwrap();
        assert!(metadata.starts_with(b"DServerMetaData:c1\":{"));
        assert!(!metadata.ends_with(b"}}"));
    }

    #[test]
    fn metadata_after_changes_keeps_leading_changes() {
        let frame = br#"{"DModel:r:m1":{"a":1}, "DServerMetaData:c1":{"SHARED_MODELS":"[]"}}"#;
        let stripped = strip_metadata(frame);
        assert_eq!(stripped.frame, br#"{"DModel:r:m1":{"a":1}, }"#.to_vec());
    }

    #[test]
    fn unterminated_metadata_key_is_left_alone() {
        let frame = br#"{"DServerMetaData:c1"#;
        let stripped = strip_metadata(frame);
        assert_eq!(stripped.frame, frame.to_vec());
        assert!(stripped.metadata.is_none());
    }

    #[test]
    fn parses_shared_model_ids() {
        let metadata = strip_metadata(META_ONLY).metadata.unwrap();
        let models = parse_shared_models(&metadata).unwrap();
        assert_eq!(
            models.into_iter().collect::<Vec<_>>(),
            vec!["DModel:r:m1".to_string(), "DModel:r:m2".to_string()]
        );
    }

    #[test]
    fn empty_shared_models_list() {
        let models = parse_shared_models(br#"x":{"SHARED_MODELS":"[]"}"#).unwrap();
        assert!(models.is_empty());
    }

    #[test]
    fn metadata_without_shared_models_property() {
        assert!(parse_shared_models(br#"x":{"OTHER":"[]"}"#).is_none());
    }

    #[test]
    fn unterminated_model_id_ends_the_scan() {
        let models =
            parse_shared_models(br#"x":{"SHARED_MODELS":"[\"DModel:r:a\",\"DModel:r:b"#).unwrap();
        assert_eq!(models.len(), 1);
        assert!(models.contains("DModel:r:a"));
    }
}
