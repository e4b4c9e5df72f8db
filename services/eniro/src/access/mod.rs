//! Access list and RBAC collaborators.
//!
//! Both are narrow seams: the service only asks "is this address allowed
//! in" and "may this user perform this action". Where the lists come from
//! (CSV ingestion, directory sync, policy files) is outside this crate.

use std::collections::{HashMap, HashSet};

/// Email syntax errors surfaced by [`validate_email`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailError {
    Missing,
    Invalid,
}

/// Basic email syntax check: `@` present, neither first nor last character.
///
/// # Errors
///
/// Returns [`EmailError::Missing`] for an empty address and
/// [`EmailError::Invalid`] when the `@` placement is wrong.
pub fn validate_email(email: &str) -> Result<(), EmailError> {
    if email.is_empty() {
        return Err(EmailError::Missing);
    }
    match email.find('@') {
        Some(at) if at >= 1 && at < email.len() - 1 => Ok(()),
        _ => Err(EmailError::Invalid),
    }
}

/// Membership lookup for the premise access list.
pub trait AccessList: Send + Sync {
    /// Resolve an email address to a user id, `None` for unknown addresses.
    fn lookup(&self, email: &str) -> Option<String>;
}

/// In-memory access list seeded from configuration. The user id is the
/// normalized address itself.
#[derive(Debug, Default)]
pub struct StaticAccessList {
    members: HashSet<String>,
}

impl StaticAccessList {
    #[must_use]
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            members: members
                .into_iter()
                .map(|email| email.as_ref().trim().to_lowercase())
                .filter(|email| !email.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated member list.
    #[must_use]
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }
}

impl AccessList for StaticAccessList {
    fn lookup(&self, email: &str) -> Option<String> {
        let normalized = email.trim().to_lowercase();
        self.members.contains(&normalized).then_some(normalized)
    }
}

/// Role-based access control decision point.
pub trait Rbac: Send + Sync {
    fn can(&self, user_id: &str, resource: &str, action: &str) -> bool;
}

/// Default decision point: every authenticated user may act. Matches the
/// deployment mode where the access list alone gates entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllRbac;

impl Rbac for AllowAllRbac {
    fn can(&self, _user_id: &str, _resource: &str, _action: &str) -> bool {
        true
    }
}

/// Explicit deny list over an otherwise permissive policy.
#[derive(Debug, Default)]
pub struct DenyListRbac {
    /// Denied `(user_id, resource, action)` triples.
    denied: HashMap<String, HashSet<(String, String)>>,
}

impl DenyListRbac {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&mut self, user_id: &str, resource: &str, action: &str) {
        self.denied
            .entry(user_id.to_string())
            .or_default()
            .insert((resource.to_string(), action.to_string()));
    }
}

impl Rbac for DenyListRbac {
    fn can(&self, user_id: &str, resource: &str, action: &str) -> bool {
        self.denied.get(user_id).is_none_or(|denies| {
            !denies.contains(&(resource.to_string(), action.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_email_checks_at_placement() {
        assert_eq!(validate_email("alice@example.com"), Ok(()));
        assert_eq!(validate_email(""), Err(EmailError::Missing));
        assert_eq!(validate_email("@example.com"), Err(EmailError::Invalid));
        assert_eq!(validate_email("alice@"), Err(EmailError::Invalid));
        assert_eq!(validate_email("no-at-sign"), Err(EmailError::Invalid));
    }

    #[test]
    fn static_access_list_normalizes_members() {
        let list = StaticAccessList::from_csv(" Alice@Example.COM , bob@example.com ,");
        assert_eq!(
            list.lookup("alice@example.com"),
            Some("alice@example.com".to_string())
        );
        assert_eq!(
            list.lookup(" ALICE@example.com "),
            Some("alice@example.com".to_string())
        );
        assert_eq!(list.lookup("mallory@example.com"), None);
    }

    #[test]
    fn deny_list_rbac_denies_only_listed_triples() {
        let mut rbac = DenyListRbac::new();
        rbac.deny("mallory@example.com", "entry", "open");

        assert!(!rbac.can("mallory@example.com", "entry", "open"));
        assert!(rbac.can("mallory@example.com", "entry", "view"));
        assert!(rbac.can("alice@example.com", "entry", "open"));
    }
}
