use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity a checker's findings are surfaced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Allow,
    #[default]
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Allow => "allow",
            Level::Warn => "warning",
            Level::Error => "error",
        }
    }

    /// `Allow` findings are dropped before they reach any output.
    pub fn is_reported(&self) -> bool {
        !matches!(self, Level::Allow)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" | "off" => Ok(Level::Allow),
            "warn" | "warning" => Ok(Level::Warn),
            "error" | "deny" => Ok(Level::Error),
            other => Err(format!("unknown level `{other}` (expected allow, warn or error)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("deny".parse::<Level>(), Ok(Level::Error));
        assert_eq!("Warning".parse::<Level>(), Ok(Level::Warn));
        assert_eq!("off".parse::<Level>(), Ok(Level::Allow));
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn allow_is_not_reported() {
        assert!(!Level::Allow.is_reported());
        assert!(Level::Warn.is_reported());
    }
}
