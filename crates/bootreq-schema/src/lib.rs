//! Requirement sets, inline script metadata, configuration, and environment identity for bootreq.
//!
//! This crate defines the schema layer: validated requirement specifiers
//! (`RequirementSet`), the commented TOML block a script uses to declare its
//! dependencies (`ScriptMetadata`), the layered `Config` with its `KEY:value`
//! argv token form, and deterministic fingerprint computation (`fingerprint`).

pub mod config;
pub mod identity;
pub mod requirement;
pub mod script;
pub mod types;

pub use config::{Config, ConfigError, ConfigOverrides, TOKEN_KEYS};
pub use identity::{fingerprint, EnvIdentity};
pub use requirement::{normalize_name, Requirement, RequirementError, RequirementSet};
pub use script::{parse_script_file, parse_script_str, ScriptError, ScriptMetadata};
pub use types::{Fingerprint, ShortId};
