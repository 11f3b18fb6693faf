//! Liveness and readiness checks for orchestrator integration.
//!
//! Driven purely by the process-wide [`ServerState`] and the strict-readiness
//! flag; no per-request state is consulted.

use std::sync::Arc;

use crate::state::{ServerHandle, ServerState};

/// Answers health probes from the server's startup outcome.
///
/// With strict readiness, a server that failed to initialize reports not
/// live and not ready. Without it, the process stays live (it keeps serving
/// a stub status endpoint) while readiness stays false.
#[derive(Clone)]
pub struct HealthService {
    server: Arc<ServerHandle>,
    strict_readiness: bool,
}

impl HealthService {
    pub fn new(server: Arc<ServerHandle>, strict_readiness: bool) -> Self {
        Self {
            server,
            strict_readiness,
        }
    }

    pub fn is_live(&self) -> bool {
        match self.server.state() {
            ServerState::Ready | ServerState::Initializing => true,
            ServerState::FailedToInitialize => !self.strict_readiness,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.server.state() == ServerState::Ready
    }
}
