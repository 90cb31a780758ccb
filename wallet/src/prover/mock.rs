//! Local proof transport
//!
//! Answers every request immediately with a deterministic, well-formed
//! proof derived from the request inputs. It does not prove anything; the
//! in-memory chain does not verify proofs.

use std::sync::{Mutex, MutexGuard};

use num_bigint::BigUint;

use super::{ProofRequest, ProofResponder, ProofTransport, RawProof};

/// How the mock answers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MockMode {
    #[default]
    Respond,
    /// Answer every request with this error string
    Fail(String),
    /// Never answer
    Silent,
}

#[derive(Default)]
struct MockState {
    mode: MockMode,
    requests: Vec<ProofRequest>,
}

#[derive(Default)]
pub struct MockProofTransport {
    state: Mutex<MockState>,
}

impl MockProofTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: MockMode) {
        self.state().mode = mode;
    }

    /// Every request dispatched so far, oldest first
    pub fn requests(&self) -> Vec<ProofRequest> {
        self.state().requests.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProofTransport for MockProofTransport {
    fn dispatch(&self, request: ProofRequest, responder: ProofResponder) -> Result<(), String> {
        let mode = {
            let mut state = self.state();
            state.requests.push(request.clone());
            state.mode.clone()
        };

        match mode {
            MockMode::Respond => {
                responder.respond(&request.id, Ok(deterministic_proof(&request)));
            }
            MockMode::Fail(message) => {
                responder.respond(&request.id, Err(message));
            }
            MockMode::Silent => {}
        }
        Ok(())
    }
}

fn deterministic_proof(request: &ProofRequest) -> RawProof {
    let mut hasher = blake3::Hasher::new();
    hasher.update(request.circuit.as_bytes());
    for (name, value) in &request.inputs {
        hasher.update(name.as_bytes());
        if let Ok(encoded) = serde_json::to_vec(value) {
            hasher.update(&encoded);
        }
    }
    let mut stream = hasher.finalize_xof();

    let mut next = || {
        let mut limb = [0u8; 32];
        stream.fill(&mut limb);
        // top two bits cleared keeps the value below the base field modulus
        limb[0] &= 0x3f;
        BigUint::from_bytes_be(&limb).to_string()
    };

    RawProof {
        pi_a: vec![next(), next(), "1".into()],
        pi_b: vec![vec![next(), next()], vec![next(), next()], vec!["1".into(), "0".into()]],
        pi_c: vec![next(), next(), "1".into()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(id: &str) -> ProofRequest {
        let mut inputs = BTreeMap::new();
        inputs.insert("root".to_string(), super::super::ProverValue::Scalar("7".into()));
        ProofRequest {
            id: id.to_string(),
            circuit: "transfer",
            inputs,
        }
    }

    #[test]
    fn test_deterministic_and_in_range() {
        let a = deterministic_proof(&request("a"));
        let b = deterministic_proof(&request("b"));
        // id is not part of the proof material
        assert_eq!(a, b);
        assert!(a.to_groth16().is_ok());
    }

    #[test]
    fn test_records_requests() {
        let transport = MockProofTransport::new();
        let responder = ProofResponder::new();
        transport.dispatch(request("x"), responder.clone()).unwrap();
        transport.set_mode(MockMode::Silent);
        transport.dispatch(request("y"), responder).unwrap();
        let ids: Vec<_> = transport.requests().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["x".to_string(), "y".to_string()]);
    }
}
