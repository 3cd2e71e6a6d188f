//! Sync Proxy Core - frame routing rules
//!
//! Pure, I/O-free logic shared by the relay server: finding and removing the
//! server metadata a client embeds in its frames, splitting change frames per
//! model, and deciding what each connected client receives.

pub mod changes;
pub mod metadata;
mod mode;
pub mod scan;

pub use changes::{ModelChanges, is_empty_frame, model_of, split_changes};
pub use metadata::{Stripped, parse_shared_models, strip_metadata};
pub use mode::{Decision, Routed, RoutingMode, UnknownMode};

/// Port the relay listens on when none is given.
pub const DEFAULT_PORT: u16 = 55055;
