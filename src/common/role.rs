//! Which side of the primary/worker split this process is on

/// Set by the supervisor on every worker it spawns.
pub const WORKER_ID_ENV: &str = "USERHIVE_WORKER_ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Owns the store; never issues operations over a channel
    Primary,
    /// Spawned by the primary; holds only a client handle
    Worker(usize),
}

impl ProcessRole {
    pub fn detect() -> Self {
        Self::from_env_value(std::env::var(WORKER_ID_ENV).ok().as_deref())
    }

    fn from_env_value(value: Option<&str>) -> Self {
        match value.and_then(|v| v.trim().parse().ok()) {
            Some(id) => ProcessRole::Worker(id),
            None => ProcessRole::Primary,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, ProcessRole::Primary)
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessRole::Primary => write!(f, "primary"),
            ProcessRole::Worker(id) => write!(f, "worker-{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_env_value() {
        assert_eq!(ProcessRole::from_env_value(None), ProcessRole::Primary);
        assert_eq!(ProcessRole::from_env_value(Some("3")), ProcessRole::Worker(3));
        assert_eq!(ProcessRole::from_env_value(Some("x")), ProcessRole::Primary);
        assert_eq!(ProcessRole::Worker(2).to_string(), "worker-2");
    }
}
