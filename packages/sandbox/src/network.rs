// ABOUTME: Sandbox network and seccomp policy types
// ABOUTME: Maps closed policy enums onto engine-native identifiers

use serde::{Deserialize, Serialize};

/// Network policy for a sandbox container.
///
/// The set is closed: every variant maps to an engine-native mode, so an
/// out-of-range configuration cannot be constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Isolated bridge network. No ports are exposed to the outside
    /// world; other containers are reachable only by IP.
    #[default]
    Bridge,
    /// No network access beyond loopback.
    None,
}

impl NetworkMode {
    /// Engine-native identifier for this mode.
    pub(crate) fn as_engine_mode(self) -> &'static str {
        match self {
            NetworkMode::Bridge => "bridge",
            NetworkMode::None => "none",
        }
    }
}

/// Seccomp policy constraining system calls made from the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeccompProfile {
    /// The engine's built-in default profile.
    #[default]
    Default,
    /// Disable syscall filtering entirely.
    Unconfined,
    /// A caller-supplied profile document, embedded into the build
    /// context under a generated filename.
    Custom(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_map_to_engine_identifiers() {
        assert_eq!(NetworkMode::Bridge.as_engine_mode(), "bridge");
        assert_eq!(NetworkMode::None.as_engine_mode(), "none");
    }

    #[test]
    fn bridge_is_the_default() {
        assert_eq!(NetworkMode::default(), NetworkMode::Bridge);
        assert_eq!(SeccompProfile::default(), SeccompProfile::Default);
    }
}
