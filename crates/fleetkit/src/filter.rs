//! Target selection shared by bulk operations and config transactions

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of FRP endpoint a config describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    Server,
    Client,
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

impl FromStr for ConfigKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" | "frps" => Ok(Self::Server),
            "client" | "frpc" => Ok(Self::Client),
            other => Err(format!("unknown config type '{other}' (expected server or client)")),
        }
    }
}

/// Runtime state of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Active,
    Inactive,
}

/// Selects targets for a batch or transaction.
///
/// Text form: `all`, `type:<server|client>`, `tag:<tag>`, `name:<glob>`,
/// `status:<active|inactive>`. Anything else is read as a name glob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    All,
    Kind(ConfigKind),
    Tag(String),
    /// Glob over the config name (`*` and `?` wildcards)
    Name(String),
    /// Only meaningful for services
    Status(ServiceState),
}

impl Filter {
    /// Match a config/service name against a `Name` glob; other variants match everything
    pub fn matches_name(&self, name: &str) -> bool {
        match self {
            Self::Name(pattern) => glob_match(pattern, name),
            _ => true,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Kind(kind) => write!(f, "type:{kind}"),
            Self::Tag(tag) => write!(f, "tag:{tag}"),
            Self::Name(pattern) => write!(f, "name:{pattern}"),
            Self::Status(ServiceState::Active) => f.write_str("status:active"),
            Self::Status(ServiceState::Inactive) => f.write_str("status:inactive"),
        }
    }
}

impl FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let Some((key, value)) = s.split_once(':') else {
            return Ok(Self::Name(s.to_string()));
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(format!("filter '{s}' is missing a value"));
        }

        match key.trim().to_ascii_lowercase().as_str() {
            "type" | "kind" => value.parse().map(Self::Kind),
            "tag" => Ok(Self::Tag(value.to_string())),
            "name" => Ok(Self::Name(value.to_string())),
            "status" => match value.to_ascii_lowercase().as_str() {
                "active" | "running" => Ok(Self::Status(ServiceState::Active)),
                "inactive" | "stopped" | "failed" => Ok(Self::Status(ServiceState::Inactive)),
                other => Err(format!("unknown status '{other}' (expected active or inactive)")),
            },
            other => Err(format!("unknown filter '{other}' (expected type, tag, name or status)")),
        }
    }
}

/// Shell-style glob with `*` and `?`, anchored at both ends
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let translated = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{translated}$")).is_ok_and(|re| re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters() {
        assert_eq!("all".parse::<Filter>().unwrap(), Filter::All);
        assert_eq!("".parse::<Filter>().unwrap(), Filter::All);
        assert_eq!("type:client".parse::<Filter>().unwrap(), Filter::Kind(ConfigKind::Client));
        assert_eq!("type:frps".parse::<Filter>().unwrap(), Filter::Kind(ConfigKind::Server));
        assert_eq!("tag:prod".parse::<Filter>().unwrap(), Filter::Tag("prod".into()));
        assert_eq!("name:frpc-eu*".parse::<Filter>().unwrap(), Filter::Name("frpc-eu*".into()));
        assert_eq!("frpc-*".parse::<Filter>().unwrap(), Filter::Name("frpc-*".into()));
        assert_eq!(
            "status:inactive".parse::<Filter>().unwrap(),
            Filter::Status(ServiceState::Inactive)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("type:relay".parse::<Filter>().is_err());
        assert!("color:red".parse::<Filter>().is_err());
        assert!("tag:".parse::<Filter>().is_err());
        assert!("status:sleepy".parse::<Filter>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for text in ["all", "type:server", "tag:edge", "name:frpc-?", "status:active"] {
            assert_eq!(text.parse::<Filter>().unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("frpc-*", "frpc-eu-1"));
        assert!(glob_match("*eu*", "frpc-eu-1"));
        assert!(glob_match("frpc-?", "frpc-a"));
        assert!(!glob_match("frpc-?", "frpc-ab"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("frps", "frpc"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_matches_name_only_for_name_filter() {
        assert!(Filter::All.matches_name("anything"));
        assert!(Filter::Tag("x".into()).matches_name("anything"));
        assert!(!Filter::Name("frps*".into()).matches_name("frpc-1"));
    }
}
