//! Framework alias resolution.

use shipyard_core::deployment::{Framework, FrameworkHint};

use crate::{ConfigError, ConfigResult};

/// Accepted aliases and the canonical framework they stand for.
const ALIASES: &[(&str, Framework)] = &[
    ("node", Framework::NodeJs),
    ("node.js", Framework::NodeJs),
    ("express", Framework::NodeJs),
    ("next", Framework::NextJs),
    ("next.js", Framework::NextJs),
    ("html", Framework::Static),
    ("css", Framework::Static),
    ("js", Framework::Static),
];

/// Resolve a raw framework field into a hint.
///
/// Missing or empty values mean `auto`. Matching is case-insensitive.
pub fn resolve_framework(raw: Option<&str>) -> ConfigResult<FrameworkHint> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(FrameworkHint::Auto);
    };
    let lowered = raw.to_ascii_lowercase();

    if lowered == "auto" {
        return Ok(FrameworkHint::Auto);
    }
    if let Some((_, framework)) = ALIASES.iter().find(|(alias, _)| *alias == lowered) {
        return Ok(FrameworkHint::Explicit(*framework));
    }
    lowered
        .parse::<Framework>()
        .map(FrameworkHint::Explicit)
        .map_err(|_| ConfigError::UnsupportedFramework(raw.to_string()))
}
