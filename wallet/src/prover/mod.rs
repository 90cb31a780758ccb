//! Prover Bridge
//!
//! Circuit inputs leave the engine as a flat map of named decimal strings.
//! Responses come back asynchronously and are matched to their request by id.
//!
//! ```text
//! ┌──────────────┐  dispatch(ProofRequest)   ┌─────────────────────┐
//! │ ProverClient │ ────────────────────────▶ │   ProofTransport    │
//! │              │                           │ (worker, webview,   │
//! │  pending:    │  ProofResponder::respond  │  remote service)    │
//! │  id → tx     │ ◀──────────────────────── │                     │
//! └──────────────┘                           └─────────────────────┘
//! ```
//!
//! A request that outlives the timeout is removed from the pending table and
//! reported as failed. It is never retried.

pub mod inputs;
pub mod mock;
pub mod proof;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use rand::RngCore;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::WalletError;
pub use inputs::{CircuitInputs, ProverValue, ShieldInputs, TransferInputs, UnshieldInputs};
pub use mock::{MockMode, MockProofTransport};
pub use proof::{Groth16Proof, RawProof};

/// Outcome reported by the prover for one request
pub type ProofResult = Result<RawProof, String>;

/// Request handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequest {
    pub id: String,
    pub circuit: &'static str,
    pub inputs: BTreeMap<String, ProverValue>,
}

/// Delivers prover responses into the pending-request table
#[derive(Clone, Default)]
pub struct ProofResponder {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ProofResult>>>>,
}

impl ProofResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a response; `false` when no request with this id is waiting
    pub fn respond(&self, id: &str, result: ProofResult) -> bool {
        match self.table().remove(id) {
            Some(reply) => reply.send(result).is_ok(),
            None => {
                warn!("Dropping prover response for unknown or expired request {id}");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    fn register(&self, id: &str) -> oneshot::Receiver<ProofResult> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.table().insert(id.to_string(), reply_tx);
        reply_rx
    }

    fn remove(&self, id: &str) {
        self.table().remove(id);
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<ProofResult>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Carries proof requests to whatever runs the prover
pub trait ProofTransport: Send + Sync {
    /// Hand off `request`; the response arrives later through `responder`
    fn dispatch(&self, request: ProofRequest, responder: ProofResponder) -> Result<(), String>;
}

/// Typed front-end over a proof transport
pub struct ProverClient<T: ProofTransport> {
    transport: T,
    responder: ProofResponder,
    timeout: Duration,
}

impl<T: ProofTransport> ProverClient<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport,
            responder: ProofResponder::new(),
            timeout,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn responder(&self) -> &ProofResponder {
        &self.responder
    }

    /// Request a proof and wait for it
    pub async fn prove<I: CircuitInputs>(&self, inputs: &I) -> Result<Groth16Proof, WalletError> {
        let id = request_id();
        let reply_rx = self.responder.register(&id);

        let request = ProofRequest {
            id: id.clone(),
            circuit: I::CIRCUIT,
            inputs: inputs.to_prover_map(),
        };
        debug!("Dispatching {} proof request {id}", I::CIRCUIT);

        if let Err(e) = self.transport.dispatch(request, self.responder.clone()) {
            self.responder.remove(&id);
            return Err(WalletError::ProofGeneration(e));
        }

        match timeout(self.timeout, reply_rx).await {
            Err(_) => {
                self.responder.remove(&id);
                warn!("Proof request {id} timed out after {:?}", self.timeout);
                Err(WalletError::ProofTimeout {
                    request_id: id,
                    timeout: self.timeout,
                })
            }
            Ok(Err(_)) => Err(WalletError::ProofGeneration(format!(
                "prover dropped request {id}"
            ))),
            Ok(Ok(Err(message))) => Err(WalletError::ProofGeneration(message)),
            Ok(Ok(Ok(raw))) => raw.to_groth16(),
        }
    }
}

/// Random 128-bit request id, hex encoded
fn request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
