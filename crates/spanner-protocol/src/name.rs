//! Resource names for databases and sessions.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ProtocolError;

static DATABASE_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"^projects/([a-z](?:[-a-z0-9.:]*[a-z0-9])?)/instances/([a-z](?:[-a-z0-9]*[a-z0-9])?)/databases/([a-z](?:[a-z0-9_-]*[a-z0-9])?)$",
    )
    .unwrap()
});

static SESSION_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^(projects/[^/]+/instances/[^/]+/databases/[^/]+)/sessions/([^/]+)$").unwrap()
});

/// Fully-qualified database name: `projects/P/instances/I/databases/D`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatabaseName {
    project: String,
    instance: String,
    database: String,
}

impl DatabaseName {
    /// Build a database name from its components.
    ///
    /// The result is validated the same way as a parsed name.
    pub fn new(
        project: impl Into<String>,
        instance: impl Into<String>,
        database: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let candidate = Self {
            project: project.into(),
            instance: instance.into(),
            database: database.into(),
        };
        candidate.to_string().parse()
    }

    /// Project identifier.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Instance identifier.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Database identifier.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Name of a session that belongs to this database.
    #[must_use]
    pub fn session(&self, id: &str) -> SessionName {
        SessionName(format!("{self}/sessions/{id}"))
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

impl FromStr for DatabaseName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = DATABASE_RE
            .captures(s.trim())
            .ok_or_else(|| ProtocolError::InvalidName {
                kind: "database",
                name: s.to_string(),
            })?;

        Ok(Self {
            project: caps[1].to_string(),
            instance: caps[2].to_string(),
            database: caps[3].to_string(),
        })
    }
}

/// Server-assigned session name.
///
/// Session names are opaque to the pool; only the database prefix is ever
/// interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionName(String);

impl SessionName {
    /// Wrap a session name received from the server or from another process.
    pub fn parse(name: impl Into<String>) -> Result<Self, ProtocolError> {
        let name = name.into();
        if !SESSION_RE.is_match(&name) {
            return Err(ProtocolError::InvalidName {
                kind: "session",
                name,
            });
        }
        Ok(Self(name))
    }

    /// The full name as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The database this session belongs to.
    #[must_use]
    pub fn database(&self) -> Option<DatabaseName> {
        SESSION_RE
            .captures(&self.0)
            .and_then(|caps| caps[1].parse().ok())
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_database_name() {
        let name: DatabaseName = "projects/my-project/instances/prod-1/databases/orders"
            .parse()
            .unwrap();
        assert_eq!(name.project(), "my-project");
        assert_eq!(name.instance(), "prod-1");
        assert_eq!(name.database(), "orders");
        assert_eq!(
            name.to_string(),
            "projects/my-project/instances/prod-1/databases/orders"
        );
    }

    #[test]
    fn test_parse_database_name_invalid() {
        assert!("".parse::<DatabaseName>().is_err());
        assert!("projects/p/instances/i".parse::<DatabaseName>().is_err());
        assert!("projects/p/instances/i/databases/".parse::<DatabaseName>().is_err());
        assert!("projects/P/instances/i/databases/d".parse::<DatabaseName>().is_err());
        assert!(DatabaseName::new("p", "i", "d/x").is_err());
    }

    #[test]
    fn test_session_name_database() {
        let db = DatabaseName::new("proj", "inst", "db1").unwrap();
        let session = db.session("abc123");
        assert_eq!(
            session.as_str(),
            "projects/proj/instances/inst/databases/db1/sessions/abc123"
        );
        assert_eq!(session.database(), Some(db));

        let parsed = SessionName::parse(session.as_str()).unwrap();
        assert_eq!(parsed, session);
        assert!(SessionName::parse("sessions/abc").is_err());
    }
}
