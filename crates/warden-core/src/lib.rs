//! # Warden Core
//!
//! Shared primitives used across the Warden control plane: cryptographically
//! secure token material and the common metadata map type.

pub mod token;

use std::collections::HashMap;

/// Free-form metadata attached to entities and events.
pub type Metadata = HashMap<String, serde_json::Value>;
