use std::collections::HashMap;

use async_trait::async_trait;

use crate::proto::Command;

/// Verifies username/password credentials offered during negotiation.
///
/// Negotiation happens before the request is read, so `command` is
/// always the placeholder `Command::Other(0)` at the time this runs.
#[async_trait]
pub trait Authentication: Send + Sync {
    async fn authenticate(&self, command: Command, username: &str, password: &str) -> bool;
}

/// Fixed in-memory credential table.
#[derive(Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, username: String, password: String) {
        self.users.insert(username, password);
    }
}

impl FromIterator<(String, String)> for StaticCredentials {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authentication for StaticCredentials {
    async fn authenticate(&self, _command: Command, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .map(|expected| expected == password)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_credentials_match_exactly() {
        let creds: StaticCredentials =
            [("alice".to_string(), "secret".to_string())].into_iter().collect();

        let placeholder = Command::Other(0);
        assert!(creds.authenticate(placeholder, "alice", "secret").await);
        assert!(!creds.authenticate(placeholder, "alice", "wrong").await);
        assert!(!creds.authenticate(placeholder, "bob", "secret").await);
    }
}
