//! The provider bundle.
//!
//! A server needs a socket layer, a clock for deadlines and a way to spawn
//! its tasks. [`Providers`] names all three with one type parameter, so the
//! server is written `Server<P: Providers, C: PacketCodec>`.

use crate::{
    NetworkProvider, TaskProvider, TimeProvider, TokioNetworkProvider, TokioTaskProvider,
    TokioTimeProvider,
};

/// Everything the server needs from its runtime environment.
pub trait Providers: Clone + 'static {
    /// Socket layer.
    type Network: NetworkProvider + Clone + 'static;
    /// Deadline enforcement for reads and writes.
    type Time: TimeProvider + Clone + 'static;
    /// Spawner for the accept loop and connection drivers.
    type Task: TaskProvider + Clone + 'static;

    /// Socket layer.
    fn network(&self) -> &Self::Network;
    /// Deadline enforcement.
    fn time(&self) -> &Self::Time;
    /// Task spawner.
    fn task(&self) -> &Self::Task;
}

/// Tokio sockets, tokio clock, `spawn_local`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProviders;

impl TokioProviders {
    /// The tokio bundle.
    pub fn new() -> Self {
        Self
    }
}

impl Providers for TokioProviders {
    type Network = TokioNetworkProvider;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;

    fn network(&self) -> &TokioNetworkProvider {
        &TokioNetworkProvider
    }

    fn time(&self) -> &TokioTimeProvider {
        &TokioTimeProvider
    }

    fn task(&self) -> &TokioTaskProvider {
        &TokioTaskProvider
    }
}
