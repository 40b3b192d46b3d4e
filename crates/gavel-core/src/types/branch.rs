use std::fmt;

use serde::{Deserialize, Serialize};

/// A branch is identified by project and ref name, e.g. ("demo", "heads/main").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchKey {
    pub project: String,
    pub ref_name: String,
}

impl BranchKey {
    pub fn new(project: &str, ref_name: &str) -> Self {
        Self {
            project: project.to_string(),
            ref_name: ref_name.to_string(),
        }
    }

    /// Last path segment, e.g. "main" for "heads/main".
    pub fn short_name(&self) -> &str {
        self.ref_name
            .rsplit_once('/')
            .map(|(_, s)| s)
            .unwrap_or(&self.ref_name)
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.ref_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_namespace() {
        assert_eq!(BranchKey::new("p", "heads/main").short_name(), "main");
        assert_eq!(BranchKey::new("p", "main").short_name(), "main");
        assert_eq!(BranchKey::new("p", "heads/feat/x").short_name(), "x");
    }
}
