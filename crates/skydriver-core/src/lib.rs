//! Shared domain types for SkyDriver: scan identifiers, the document
//! shapes persisted by `skydriver-db`, and the pure scan-state derivation.

pub mod hash;
pub mod state;
pub mod types;
pub mod validation;

pub use hash::canonical_event_hash;
pub use state::{derive_scan_state, Deactivation, ScanState};
pub use types::*;
pub use validation::{validate_scan_request, ScanRequestInput, ValidationError};
