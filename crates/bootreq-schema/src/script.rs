use crate::config::ConfigOverrides;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

const BLOCK_START: &str = "/// script";
const BLOCK_END: &str = "///";
const TOOL_TABLE: &str = "bootreq";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse inline metadata: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("inline metadata line {line} is not a comment")]
    UncommentedLine { line: usize },
    #[error("inline metadata block is unterminated")]
    Unterminated,
    #[error("invalid [tool.bootreq] table: {0}")]
    InvalidToolTable(String),
}

/// Dependencies and configuration declared in a script's inline block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptMetadata {
    pub dependencies: Vec<String>,
    pub requires_python: Option<String>,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(rename = "requires-python", default)]
    requires_python: Option<String>,
    #[serde(default)]
    tool: toml::Table,
}

pub fn parse_script_file(path: &Path) -> Result<ScriptMetadata, ScriptError> {
    let content = fs::read_to_string(path)?;
    parse_script_str(&content)
}

/// Parse the `# /// script` block at the top of a script.
///
/// Scripts without a block declare no dependencies.
pub fn parse_script_str(content: &str) -> Result<ScriptMetadata, ScriptError> {
    let Some(block) = extract_block(content)? else {
        return Ok(ScriptMetadata::default());
    };

    let raw: RawBlock = toml::from_str(&block)?;
    let overrides = match raw.tool.get(TOOL_TABLE) {
        Some(value) => value
            .clone()
            .try_into::<ConfigOverrides>()
            .map_err(|e: toml::de::Error| ScriptError::InvalidToolTable(e.to_string()))?,
        None => ConfigOverrides::default(),
    };

    Ok(ScriptMetadata {
        dependencies: raw.dependencies,
        requires_python: raw.requires_python,
        overrides,
    })
}

fn extract_block(content: &str) -> Result<Option<String>, ScriptError> {
    let mut started = false;
    let mut body = String::new();

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if !started {
            if trimmed.is_empty() || trimmed.starts_with("#!") {
                continue;
            }
            let Some(comment) = trimmed.strip_prefix('#') else {
                break;
            };
            if comment.trim() == BLOCK_START {
                started = true;
            }
            continue;
        }

        let Some(comment) = trimmed.strip_prefix('#') else {
            return Err(ScriptError::UncommentedLine { line: idx + 1 });
        };
        if comment.trim() == BLOCK_END {
            return Ok(Some(body));
        }
        body.push_str(comment.strip_prefix(' ').unwrap_or(comment));
        body.push('\n');
    }

    if started {
        return Err(ScriptError::Unterminated);
    }
    Ok(None)
}
