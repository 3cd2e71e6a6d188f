use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::changes::{ModelChanges, is_empty_frame, split_changes};
use crate::metadata::{parse_shared_models, strip_metadata};

/// How frames are relayed between clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// Relay every frame verbatim.
    Plain,
    /// Strip server metadata, drop empty frames, relay the rest to everyone.
    ShareAll,
    /// Like `ShareAll`, but each client only gets changes for its shared models.
    #[default]
    SharedModels,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown routing mode '{0}' (expected plain, share-all or shared-models)")]
pub struct UnknownMode(pub String);

impl RoutingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::ShareAll => "share-all",
            Self::SharedModels => "shared-models",
        }
    }

    /// Decide what a single incoming frame turns into.
    pub fn route(self, frame: &[u8]) -> Decision {
        if self == Self::Plain {
            return Decision {
                shared_models: None,
                routed: Routed::Unchanged,
            };
        }

        let stripped = strip_metadata(frame);
        let had_metadata = stripped.metadata.is_some();
        let shared_models = stripped.metadata.as_deref().and_then(parse_shared_models);

        let routed = if is_empty_frame(&stripped.frame) {
            Routed::Nothing
        } else if self == Self::SharedModels {
            Routed::PerModel(split_changes(&stripped.frame))
        } else if had_metadata {
            Routed::All(stripped.frame)
        } else {
            Routed::Unchanged
        };

        Decision {
            shared_models,
            routed,
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "share-all" | "share_all" => Ok(Self::ShareAll),
            "shared-models" | "shared_models" => Ok(Self::SharedModels),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Outcome of routing one frame.
#[derive(Debug)]
pub struct Decision {
    /// New shared-model set announced by the sender, if any.
    pub shared_models: Option<BTreeSet<String>>,
    pub routed: Routed,
}

#[derive(Debug)]
pub enum Routed {
    /// Relay the frame exactly as received.
    Unchanged,
    /// Relay these bytes to every other client.
    All(Vec<u8>),
    /// Each client gets the changes for its own shared models.
    PerModel(ModelChanges),
    /// Nothing to relay.
    Nothing,
}
