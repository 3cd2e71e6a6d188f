//! Splitting a change frame into per-model pieces.
//!
//! A change frame is an object whose entries are keyed by element id:
//! `{"DModel:r:m1":{...}, "DNode:r:m1/n7":{...}}`. Each entry belongs to the
//! model its id names, and a client only receives entries for the models it
//! shares.

use std::collections::{BTreeSet, HashMap};

use crate::scan::{closing_marker, find_byte};

const EMPTY_FRAME: &[u8] = b"{}";
const JOINER: &[u8] = b", ";

/// True for the empty change object `{}`, which is never relayed.
pub fn is_empty_frame(frame: &[u8]) -> bool {
    frame == EMPTY_FRAME
}

/// Model a change entry belongs to, derived from the entry's id.
pub fn model_of(id: &str) -> Option<String> {
    if id.starts_with("DModule") {
        None
    } else if id.starts_with("DModel") {
        Some(id.to_string())
    } else if id.starts_with("DNode") {
        let marker = id.find(":r:")?;
        let slash = marker + id[marker..].find('/')?;
        Some(format!("DModel:r:{}", &id[marker + 3..slash]))
    } else {
        None
    }
}

/// The entries of one change frame, grouped by model.
#[derive(Debug, Default, Clone)]
pub struct ModelChanges {
    by_model: HashMap<String, Vec<Vec<u8>>>,
}

impl ModelChanges {
    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.by_model.is_empty()
    }

    #[cfg(test)]
    fn models(&self) -> impl Iterator<Item = &str> {
        self.by_model.keys().map(String::as_str)
    }

    /// Build the frame a client sharing `shared` should receive.
    ///
    /// Yields `{}` when none of the entries concern those models.
    pub fn for_models(&self, shared: &BTreeSet<String>) -> Vec<u8> {
        let mut out = Vec::from(&b"{"[..]);
        let mut first = true;
        for change in shared
            .iter()
            .filter_map(|model| self.by_model.get(model))
            .flatten()
        {
            if !first {
                out.extend_from_slice(JOINER);
            }
            out.extend_from_slice(change);
            first = false;
        }
        out.push(b'}');
        out
    }
}

/// Split `frame` into its change entries and group them by model.
///
/// Entries whose id maps to no model are dropped. When an id occurs twice the
/// later entry wins but keeps the position of the first.
pub fn split_changes(frame: &[u8]) -> ModelChanges {
    let mut entries: Vec<(String, &[u8])> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    let mut cursor = 0;
    while let Some(id_start) = find_byte(frame, b'"', cursor).filter(|&pos| pos > 0) {
        let Some(id_end) = find_byte(frame, b'"', id_start + 1) else {
            break;
        };
        if id_end + 2 >= frame.len() {
            break;
        }
        let change_end = closing_marker(frame, id_end + 3, b'{', b'}');
        let id = String::from_utf8_lossy(&frame[id_start + 1..id_end]).into_owned();
        let change = &frame[id_start..=change_end];
        cursor = change_end;

        match positions.get(&id) {
            Some(&pos) => entries[pos].1 = change,
            None => {
                positions.insert(id.clone(), entries.len());
                entries.push((id, change));
            }
        }
    }

    let mut by_model: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
    for (id, change) in entries {
        if let Some(model) = model_of(&id) {
            by_model.entry(model).or_default().push(change.to_vec());
        }
    }

    ModelChanges { by_model }
}
