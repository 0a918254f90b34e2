//! Session lifecycle phases.

use serde::Serialize;

/// Where a session stands on the way from empty specs to answering queries.
///
/// The phase is derived from session state rather than stored, so it can
/// never drift from what the session actually holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    NoDialect,
    CollectingSpecs,
    ReadyToBuild,
    UriBuilt,
    Connected,
    Querying,
}

impl SessionPhase {
    pub fn derive(
        has_dialect: bool,
        missing_count: usize,
        uri_built: bool,
        connected: bool,
        queried: bool,
    ) -> Self {
        match (connected, uri_built) {
            (true, _) if queried => Self::Querying,
            (true, _) => Self::Connected,
            (false, true) => Self::UriBuilt,
            _ if !has_dialect => Self::NoDialect,
            _ if missing_count > 0 => Self::CollectingSpecs,
            _ => Self::ReadyToBuild,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDialect => "NO_DIALECT",
            Self::CollectingSpecs => "COLLECTING_SPECS",
            Self::ReadyToBuild => "READY_TO_BUILD",
            Self::UriBuilt => "URI_BUILT",
            Self::Connected => "CONNECTED",
            Self::Querying => "QUERYING",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_progression() {
        assert_eq!(
            SessionPhase::derive(false, 1, false, false, false),
            SessionPhase::NoDialect
        );
        assert_eq!(
            SessionPhase::derive(true, 2, false, false, false),
            SessionPhase::CollectingSpecs
        );
        assert_eq!(
            SessionPhase::derive(true, 0, false, false, false),
            SessionPhase::ReadyToBuild
        );
        assert_eq!(
            SessionPhase::derive(true, 0, true, false, false),
            SessionPhase::UriBuilt
        );
        assert_eq!(
            SessionPhase::derive(true, 0, true, true, false),
            SessionPhase::Connected
        );
        assert_eq!(
            SessionPhase::derive(true, 0, true, true, true),
            SessionPhase::Querying
        );
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::UriBuilt.to_string(), "URI_BUILT");
    }
}
