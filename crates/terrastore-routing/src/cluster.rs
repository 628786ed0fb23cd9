//! Cluster identity.

/// A named group of nodes, flagged local when it is the cluster this process
/// belongs to.
///
/// The cluster set is declared at startup and immutable afterwards; only the
/// node membership inside each cluster changes at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cluster {
    name: String,
    local: bool,
}

impl Cluster {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local: true,
        }
    }

    pub fn remote(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_local(&self) -> bool {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let local = Cluster::local("c1");
        let remote = Cluster::remote("c2");
        assert_eq!(local.name(), "c1");
        assert!(local.is_local());
        assert!(!remote.is_local());
        assert_ne!(local, remote);
        assert_eq!(local, Cluster::local("c1"));
    }
}
