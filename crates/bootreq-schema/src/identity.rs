use crate::config::Config;
use crate::requirement::RequirementSet;
use crate::types::{Fingerprint, ShortId};
use serde::Serialize;

/// Deterministic identity for an environment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvIdentity {
    pub fingerprint: Fingerprint,
    pub short_id: ShortId,
}

/// Compute the fingerprint of the environment that satisfies `requirements`
/// under `config`.
///
/// Requirements are hashed in canonical, sorted, deduplicated form, so
/// declaration order, duplicate entries, whitespace, and name case do not
/// matter. Only configuration that changes what ends up installed takes part:
/// the base interpreter, the index URL, the isolation backend and its
/// version, and installer options. Every input is written as a tagged,
/// newline-terminated line; none of the values can contain a newline.
pub fn fingerprint(requirements: &RequirementSet, config: &Config) -> EnvIdentity {
    let mut hasher = blake3::Hasher::new();

    for req in requirements.canonical() {
        hasher.update(format!("req:{req}\n").as_bytes());
    }
    hasher.update(format!("python:{}\n", config.python).as_bytes());
    hasher.update(format!("index:{}\n", config.index_url).as_bytes());
    hasher.update(format!("backend:{}\n", config.backend).as_bytes());
    hasher.update(format!("virtualenv:{}\n", config.virtualenv_version).as_bytes());
    for opt in &config.pip_options {
        hasher.update(format!("pip:{opt}\n").as_bytes());
    }

    let hex = hasher.finalize().to_hex().to_string();
    let short = hex[..12].to_owned();

    EnvIdentity {
        fingerprint: Fingerprint::new(hex),
        short_id: ShortId::new(short),
    }
}
