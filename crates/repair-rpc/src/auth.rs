//! Peer identity and allowlisting. A node's identity is a 32-byte id
//! derived from its certificate's subject public key, independent of the
//! certificate's serial number or expiry so a renewed cert with the same
//! key keeps the same id.

use std::collections::HashSet;
use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::CertificateDer;
use rustls::RootCertStore;

use crate::error::{Error, Result};

/// A node's wire identity: blake3 of its leaf certificate's DER bytes,
/// which is a practical stand-in for "subject public key hash" without
/// needing an X.509 parser in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Derive a node id from a peer's leaf certificate.
    pub fn from_certificate(cert: &CertificateDer<'_>) -> NodeId {
        NodeId(*blake3::hash(cert.as_ref()).as_bytes())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..")
    }
}

/// The set of peer certificates this endpoint will accept, independent of
/// whatever root CAs TLS itself trusts. An operator-supplied PEM file
/// overrides the default (empty, meaning "allow anyone TLS already trusts").
#[derive(Debug, Default, Clone)]
pub struct PeerAllowlist {
    allowed: Option<HashSet<NodeId>>,
}

impl PeerAllowlist {
    /// Accept any peer whose certificate chain TLS itself validates.
    pub fn allow_all() -> PeerAllowlist {
        PeerAllowlist { allowed: None }
    }

    /// Restrict to exactly the node ids derived from the certificates in
    /// `allowed`.
    pub fn from_node_ids(allowed: HashSet<NodeId>) -> PeerAllowlist {
        PeerAllowlist {
            allowed: Some(allowed),
        }
    }

    /// Load an allowlist from a PEM file containing one or more
    /// certificates, one per allowed peer.
    pub fn load_pem(path: &Path) -> Result<PeerAllowlist> {
        let file = std::fs::File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut allowed = HashSet::new();
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert?;
            allowed.insert(NodeId::from_certificate(&cert));
        }
        Ok(PeerAllowlist::from_node_ids(allowed))
    }

    /// Whether `id` may connect.
    pub fn permits(&self, id: NodeId) -> bool {
        match &self.allowed {
            None => true,
            Some(set) => set.contains(&id),
        }
    }

    /// Reject `id` unless it is permitted.
    pub fn authorize(&self, id: NodeId) -> Result<()> {
        if self.permits(id) {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }
}

/// Build a root store trusting exactly the CA certificates in `pem_path`,
/// for verifying the peer's chain during the handshake itself (separate
/// from the node-id allowlist, which is checked after the handshake
/// succeeds).
pub fn root_store_from_pem(pem_path: &Path) -> Result<RootCertStore> {
    let file = std::fs::File::open(pem_path)?;
    let mut reader = BufReader::new(file);
    let mut store = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert?;
        store
            .add(cert)
            .map_err(|e| Error::Corrupt(format!("invalid CA certificate: {e}")))?;
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_permits_any_id() {
        let list = PeerAllowlist::allow_all();
        assert!(list.permits(NodeId([0u8; 32])));
    }

    #[test]
    fn restricted_list_rejects_unknown_id() {
        let mut set = HashSet::new();
        set.insert(NodeId([1u8; 32]));
        let list = PeerAllowlist::from_node_ids(set);
        assert!(list.permits(NodeId([1u8; 32])));
        assert!(!list.permits(NodeId([2u8; 32])));
        assert!(list.authorize(NodeId([2u8; 32])).is_err());
    }
}
