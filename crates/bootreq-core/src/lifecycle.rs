use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Stages a script invocation moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Checking,
    BootstrappingTool,
    BuildingEnv,
    Relaunching,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Checking => write!(f, "checking"),
            Stage::BootstrappingTool => write!(f, "bootstrapping tool"),
            Stage::BuildingEnv => write!(f, "building environment"),
            Stage::Relaunching => write!(f, "relaunching"),
            Stage::Done => write!(f, "done"),
        }
    }
}

pub fn validate_transition(from: Stage, to: Stage) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (Stage::Checking, Stage::BootstrappingTool | Stage::Done)
            | (Stage::BootstrappingTool, Stage::BuildingEnv | Stage::Done)
            | (Stage::BuildingEnv, Stage::Relaunching)
            | (Stage::Relaunching, Stage::Done)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
