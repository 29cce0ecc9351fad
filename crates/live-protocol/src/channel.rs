//! Channel naming for Live.
//!
//! Every channel is addressed as `scope/namespace/path` within one
//! organization. The scope selects the family of feature modules, the
//! namespace selects the feature module itself and the path is interpreted
//! by that module's handler.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Channel naming errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel string was empty.
    #[error("Channel name cannot be empty")]
    Empty,

    /// The channel string exceeded [`MAX_CHANNEL_NAME_LENGTH`].
    #[error("Channel name too long: {0} bytes")]
    TooLong(usize),

    /// Fewer than three `/`-separated parts.
    #[error("Channel must have the form scope/namespace/path: {0}")]
    Incomplete(String),

    /// A character outside the allowed set.
    #[error("Channel contains invalid character {0:?}")]
    InvalidCharacter(char),

    /// An empty segment such as `a//b`.
    #[error("Channel contains an empty path segment: {0}")]
    EmptySegment(String),

    /// Scope is not one of the known scopes.
    #[error("Unknown channel scope: {0}")]
    UnknownScope(String),

    /// Org-scoped key without a valid org prefix.
    #[error("Invalid org channel key: {0}")]
    InvalidOrgKey(String),
}

/// Top-level channel scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Channels owned by built-in features (dashboards, broadcast).
    Core,
    /// Channels owned by plugins.
    Plugin,
    /// Channels owned by datasource instances.
    Datasource,
    /// Managed streams pushed into by producers.
    Stream,
}

impl Scope {
    /// The scope as it appears in a channel string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Scope::Core => "core",
            Scope::Plugin => "plugin",
            Scope::Datasource => "ds",
            Scope::Stream => "stream",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Scope::Core),
            "plugin" => Ok(Scope::Plugin),
            "ds" => Ok(Scope::Datasource),
            "stream" => Ok(Scope::Stream),
            other => Err(ChannelError::UnknownScope(other.to_string())),
        }
    }
}

/// A parsed channel address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelAddress {
    /// Scope of the channel.
    pub scope: Scope,
    /// Feature namespace within the scope.
    pub namespace: String,
    /// Handler-specific path, may itself contain `/`.
    pub path: String,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=')
}

impl ChannelAddress {
    /// Build an address from its parts.
    #[must_use]
    pub fn new(scope: Scope, namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scope,
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    /// Parse a `scope/namespace/path` string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty, too long, has fewer than
    /// three parts, contains empty segments or disallowed characters, or
    /// names an unknown scope.
    pub fn parse(channel: &str) -> Result<Self, ChannelError> {
        if channel.is_empty() {
            return Err(ChannelError::Empty);
        }
        if channel.len() > MAX_CHANNEL_NAME_LENGTH {
            return Err(ChannelError::TooLong(channel.len()));
        }
        if let Some(c) = channel.chars().find(|c| !is_allowed(*c)) {
            return Err(ChannelError::InvalidCharacter(c));
        }
        if channel.split('/').any(str::is_empty) {
            return Err(ChannelError::EmptySegment(channel.to_string()));
        }

        let mut parts = channel.splitn(3, '/');
        let (Some(scope), Some(namespace), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ChannelError::Incomplete(channel.to_string()));
        };

        Ok(Self {
            scope: scope.parse()?,
            namespace: namespace.to_string(),
            path: path.to_string(),
        })
    }

    /// The `namespace/path` part, as handed to scope-wide handler factories.
    #[must_use]
    pub fn namespaced_path(&self) -> String {
        format!("{}/{}", self.namespace, self.path)
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.namespace, self.path)
    }
}

impl FromStr for ChannelAddress {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Build the org-scoped key under which a channel lives in the hub.
#[must_use]
pub fn org_channel(org_id: i64, channel: &str) -> String {
    format!("{org_id}/{channel}")
}

/// Split an org-scoped key back into org id and channel.
///
/// # Errors
///
/// Returns an error if the key has no numeric org prefix.
pub fn split_org_channel(key: &str) -> Result<(i64, &str), ChannelError> {
    let (org, channel) = key
        .split_once('/')
        .ok_or_else(|| ChannelError::InvalidOrgKey(key.to_string()))?;
    let org_id = org
        .parse()
        .map_err(|_| ChannelError::InvalidOrgKey(key.to_string()))?;
    Ok((org_id, channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel() {
        let addr = ChannelAddress::parse("core/dashboard/uid/abc").unwrap();
        assert_eq!(addr.scope, Scope::Core);
        assert_eq!(addr.namespace, "dashboard");
        assert_eq!(addr.path, "uid/abc");
        assert_eq!(addr.to_string(), "core/dashboard/uid/abc");
        assert_eq!(addr.namespaced_path(), "dashboard/uid/abc");
    }

    #[test]
    fn test_parse_scopes() {
        assert_eq!(
            ChannelAddress::parse("ds/my-ds/metrics").unwrap().scope,
            Scope::Datasource
        );
        assert_eq!(
            ChannelAddress::parse("stream/telegraf/cpu").unwrap().scope,
            Scope::Stream
        );
        assert!(matches!(
            ChannelAddress::parse("admin/x/y"),
            Err(ChannelError::UnknownScope(_))
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(ChannelAddress::parse(""), Err(ChannelError::Empty));
        assert!(matches!(
            ChannelAddress::parse("core/dashboard"),
            Err(ChannelError::Incomplete(_))
        ));
        assert!(matches!(
            ChannelAddress::parse("core//path"),
            Err(ChannelError::EmptySegment(_))
        ));
        assert!(matches!(
            ChannelAddress::parse("core/dashboard/uid/"),
            Err(ChannelError::EmptySegment(_))
        ));
        assert_eq!(
            ChannelAddress::parse("core/dash board/x"),
            Err(ChannelError::InvalidCharacter(' '))
        );

        let long = format!("core/ns/{}", "a".repeat(MAX_CHANNEL_NAME_LENGTH));
        assert!(matches!(
            ChannelAddress::parse(&long),
            Err(ChannelError::TooLong(_))
        ));
    }

    #[test]
    fn test_org_channel_key() {
        let key = org_channel(7, "core/broadcast/news");
        assert_eq!(key, "7/core/broadcast/news");
        assert_eq!(split_org_channel(&key).unwrap(), (7, "core/broadcast/news"));
        assert!(split_org_channel("x/core/a/b").is_err());
        assert!(split_org_channel("nokey").is_err());
    }
}
