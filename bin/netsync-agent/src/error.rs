use netsync_cluster::ClusterError;
use netsync_core::CoreError;
use netsync_link::LinkError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Link(#[from] LinkError),
}
