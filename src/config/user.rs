// ABOUTME: The compose/image `user` field: "user[:group]" by name or number.
// ABOUTME: Numeric parts can be used directly; names need the image's passwd/group files.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSpec {
    Numeric(u32),
    Name(String),
}

impl IdSpec {
    fn parse(s: &str) -> Self {
        s.parse::<u32>()
            .map(IdSpec::Numeric)
            .unwrap_or_else(|_| IdSpec::Name(s.to_string()))
    }

    pub fn numeric(&self) -> Option<u32> {
        match self {
            IdSpec::Numeric(id) => Some(*id),
            IdSpec::Name(_) => None,
        }
    }
}

impl fmt::Display for IdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSpec::Numeric(id) => write!(f, "{}", id),
            IdSpec::Name(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub user: IdSpec,
    pub group: Option<IdSpec>,
}

impl UserSpec {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let (user, group) = match s.split_once(':') {
            Some((user, group)) => (user, Some(group)),
            None => (s, None),
        };
        if user.is_empty() || group.is_some_and(str::is_empty) {
            return Err(format!("invalid user: {:?}", s));
        }
        Ok(UserSpec {
            user: IdSpec::parse(user),
            group: group.map(IdSpec::parse),
        })
    }

    /// Both IDs, if they can be known without reading the image's passwd file.
    pub fn numeric(&self) -> Option<(u32, u32)> {
        let uid = self.user.numeric()?;
        let gid = self.group.as_ref()?.numeric()?;
        Some((uid, gid))
    }
}

impl fmt::Display for UserSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}:{}", self.user, group),
            None => write!(f, "{}", self.user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_pair() {
        let spec = UserSpec::parse("1000:1000").unwrap();
        assert_eq!(spec.numeric(), Some((1000, 1000)));
    }

    #[test]
    fn uid_without_group_is_not_fully_numeric() {
        let spec = UserSpec::parse("1000").unwrap();
        assert_eq!(spec.user, IdSpec::Numeric(1000));
        assert_eq!(spec.numeric(), None);
    }

    #[test]
    fn named_user_and_group() {
        let spec = UserSpec::parse("postgres:staff").unwrap();
        assert_eq!(spec.user, IdSpec::Name("postgres".to_string()));
        assert_eq!(spec.group, Some(IdSpec::Name("staff".to_string())));
    }

    #[test]
    fn rejects_empty_group() {
        assert!(UserSpec::parse("app:").is_err());
    }
}
