use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("Object has no name")]
    MissingName,
}

impl ClusterError {
    /// True when an update lost an optimistic concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Kubernetes(kube::Error::Api(resp)) if resp.code == 409)
    }
}
