//! Pairwise reconciliation of a client delta with a concurrent server delta.
//!
//! ```text
//!   client: c1 c2 c3          server: s1 s2
//!
//!        s1 ──► c1 ──► c2 ──► c3 ──► s1'
//!        s2 ──► c1'──► c2'──► c3'──► s2'
//! ```
//!
//! Each server operation is pushed through every client operation in
//! order, rewriting both sides as it goes.

use tessera_model::{transform, TransformError, WaveletOperation};

/// A client and server operation list based at the same version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaPair {
    client: Vec<WaveletOperation>,
    server: Vec<WaveletOperation>,
}

impl DeltaPair {
    pub fn new(client: Vec<WaveletOperation>, server: Vec<WaveletOperation>) -> Self {
        Self { client, server }
    }

    pub fn client(&self) -> &[WaveletOperation] {
        &self.client
    }

    pub fn server(&self) -> &[WaveletOperation] {
        &self.server
    }

    pub fn into_parts(self) -> (Vec<WaveletOperation>, Vec<WaveletOperation>) {
        (self.client, self.server)
    }

    /// Transform the pair so that `server` then `client'` converges with
    /// `client` then `server'`.
    ///
    /// When both sides carry the same operations the client side becomes
    /// empty and the server side becomes version updates.
    pub fn transform(self) -> Result<DeltaPair, TransformError> {
        if Self::are_same(&self.client, &self.server) {
            let server = self
                .server
                .iter()
                .map(|op| op.create_version_update_op(op.version_increment(), op.hashed_version().cloned()))
                .collect();
            return Ok(DeltaPair::new(Vec::new(), server));
        }

        let mut client = self.client;
        let mut server = Vec::with_capacity(self.server.len());
        for mut server_op in self.server {
            for client_op in client.iter_mut() {
                let (c, s) = transform(client_op, &server_op)?;
                *client_op = c;
                server_op = s;
            }
            server.push(server_op);
        }
        Ok(DeltaPair::new(client, server))
    }

    /// Whether two operation lists are the same edits by the same author.
    /// Timestamps and resulting versions are ignored.
    pub fn are_same(client: &[WaveletOperation], server: &[WaveletOperation]) -> bool {
        !client.is_empty()
            && client.len() == server.len()
            && client
                .iter()
                .zip(server)
                .all(|(c, s)| c.creator() == s.creator() && c.kind == s.kind)
    }
}

/// Transform boundary used by the client queue and the server core.
pub trait DeltaTransformer: Send + Sync {
    fn transform(
        &self,
        client: Vec<WaveletOperation>,
        server: Vec<WaveletOperation>,
    ) -> Result<DeltaPair, TransformError>;
}

/// The operational-transform implementation of [`DeltaTransformer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OtTransformer;

impl DeltaTransformer for OtTransformer {
    fn transform(
        &self,
        client: Vec<WaveletOperation>,
        server: Vec<WaveletOperation>,
    ) -> Result<DeltaPair, TransformError> {
        DeltaPair::new(client, server).transform()
    }
}
