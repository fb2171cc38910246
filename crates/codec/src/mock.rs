//! Scriptable codec for testing.

use crate::error::{ErrorKind, Result};
use crate::{Codec, EncodeRequest, Encoded};
use async_trait::async_trait;
use exn::ResultExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Codec that never looks at pixels.
///
/// The "encoded" output is the lower-case format name followed by the first
/// half of the input, so outputs are deterministic, distinguishable per
/// format, and smaller than their source. Inputs registered with
/// [`reject`](Self::reject) fail as [`Unparseable`](ErrorKind::Unparseable).
///
/// A gated codec blocks every call until the test releases a permit on the
/// shared [`Semaphore`], which makes it possible to observe work while it is
/// in flight.
#[derive(Default)]
pub struct MockCodec {
    rejects: Vec<Vec<u8>>,
    gate: Option<Arc<Semaphore>>,
    requests: Mutex<Vec<EncodeRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block each call on a permit from `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    /// Fail any call whose input equals `input`.
    pub fn reject(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.rejects.push(input.into());
        self
    }

    /// The output [`MockCodec`] produces for `input`.
    pub fn expected_output(input: &[u8], request: &EncodeRequest) -> Vec<u8> {
        let mut data = request.format.as_str().as_bytes().to_vec();
        data.extend_from_slice(&input[..input.len() / 2]);
        data
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<EncodeRequest> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Codec for MockCodec {
    async fn encode(&self, input: Vec<u8>, request: EncodeRequest) -> Result<Encoded> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(request);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let released = match &self.gate {
            Some(gate) => gate.acquire().await.map(|permit| permit.forget()),
            None => {
                tokio::task::yield_now().await;
                Ok(())
            },
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        released.or_raise(|| ErrorKind::Worker)?;

        if self.rejects.contains(&input) {
            exn::bail!(ErrorKind::Unparseable);
        }
        Ok(Encoded {
            data: Self::expected_output(&input, &request),
            width: 1,
            height: 1,
            flattened_alpha: false,
        })
    }
}
