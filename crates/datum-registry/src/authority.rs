//! Namespace authorization seam
//!
//! Who owns a namespace is decided outside the registry. The index asks a
//! [`NamespaceAuthority`] before creating identifiers or accepting local
//! publications; the default answers yes to everything.

use datum_core::{DatumError, Result};

/// Decides whether a namespace may be written through this registry
pub trait NamespaceAuthority: Send + Sync {
    /// Check that new identifiers may be created under `namespace`
    fn authorize_register(&self, namespace: &str) -> Result<()>;

    /// Check that new versions may be published under `namespace`
    fn authorize_publish(&self, namespace: &str) -> Result<()> {
        self.authorize_register(namespace)
    }
}

/// Authority that allows every namespace
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl NamespaceAuthority for AllowAll {
    fn authorize_register(&self, _namespace: &str) -> Result<()> {
        Ok(())
    }
}

/// Authority limited to a fixed set of namespaces
#[derive(Debug, Clone, Default)]
pub struct StaticAuthority {
    namespaces: Vec<String>,
}

impl StaticAuthority {
    /// Allow exactly `namespaces`
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }
}

impl NamespaceAuthority for StaticAuthority {
    fn authorize_register(&self, namespace: &str) -> Result<()> {
        if self.namespaces.iter().any(|n| n == namespace) {
            Ok(())
        } else {
            Err(DatumError::unauthorized(namespace, "namespace is not managed by this registry"))
        }
    }
}
