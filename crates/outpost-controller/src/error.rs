//! Reconcile error kinds
//!
//! Callers branch on [`ErrorKind`], never on message text. Every layer adds a
//! short static description of the step it was performing through
//! [`ResultExt::context`].

use outpost_cloud::CloudError;
use outpost_core::CoreError;
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Every lookup strategy came back empty; creating is safe
    #[error("Resource not found")]
    NotFound,

    /// A pinned or tracked id no longer resolves on the provider side
    #[error("Tracked resource no longer exists: {0}")]
    MissingResource(String),

    #[error("No free address left in public IP pool {0}")]
    EmptyPool(String),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Spec error: {0}")]
    Spec(#[from] CoreError),

    #[error("Reconcile pass exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),

    #[error("{context}: {source}")]
    Context {
        context: Cow<'static, str>,
        #[source]
        source: Box<ReconcileError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    MissingResource,
    EmptyPool,
    Cloud,
    Spec,
    DeadlineExceeded,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::NotFound => ErrorKind::NotFound,
            ReconcileError::MissingResource(_) => ErrorKind::MissingResource,
            ReconcileError::EmptyPool(_) => ErrorKind::EmptyPool,
            ReconcileError::Cloud(_) => ErrorKind::Cloud,
            ReconcileError::Spec(_) => ErrorKind::Spec,
            ReconcileError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            ReconcileError::Context { source, .. } => source.kind(),
        }
    }

    /// Innermost error under any context layers
    pub fn root(&self) -> &ReconcileError {
        let mut current = self;
        while let ReconcileError::Context { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// The resource is absent on the provider side, whichever way it was asked
    pub fn is_gone(&self) -> bool {
        match self.root() {
            ReconcileError::NotFound | ReconcileError::MissingResource(_) => true,
            ReconcileError::Cloud(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        ReconcileError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

pub trait ResultExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T, E: Into<ReconcileError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }
}

/// Map a provider "not found" on a delete call to success
pub(crate) fn tolerate_gone(result: outpost_cloud::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            tracing::debug!(error = %e, "Resource already gone");
            Ok(())
        }
        other => Ok(other?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_walks_context() {
        let err: Result<()> = Err(ReconcileError::EmptyPool("edge".into()));
        let err = err
            .context("failed to allocate public ip")
            .context("failed to reconcile nat service")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyPool);
        assert_eq!(
            err.to_string(),
            "failed to reconcile nat service: failed to allocate public ip: No free address left in public IP pool edge"
        );
    }

    #[test]
    fn test_cloud_not_found_is_gone() {
        let err: Result<()> = Err(CloudError::ResourceNotFound("vpc-1".into())).context("get net");
        let err = err.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cloud);
        assert!(err.is_gone());
        assert!(!ReconcileError::EmptyPool("p".into()).is_gone());
    }

    #[test]
    fn test_tolerate_gone() {
        assert!(tolerate_gone(Err(CloudError::ResourceNotFound("x".into()))).is_ok());
        let err = tolerate_gone(Err(CloudError::Conflict("busy".into()))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cloud);
    }
}
