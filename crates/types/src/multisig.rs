//! Recursively nested multi-signatures.
//!
//! Every attesting participant wraps the previous confirmation one layer
//! deeper, so the nesting depth equals the number of attesters and the
//! outermost layer belongs to the most recent one. Verification unwraps the
//! chain against a known, ordered participant list; a depth that does not
//! match the expected list is itself a verification failure.

use serde::{Deserialize, Serialize};

use crate::Signature;

/// Errors from multi-signature structure checks.
#[derive(Debug, thiserror::Error)]
pub enum MultiSignatureError {
    /// Fewer nested layers than expected participants.
    #[error("multi-signature has {actual} layers, expected {expected}")]
    TooShallow { expected: usize, actual: usize },

    /// More nested layers than expected participants.
    #[error("multi-signature has more than {expected} layers")]
    TooDeep { expected: usize },
}

/// A nested signature chain, one layer per attesting participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSignature {
    /// The confirmation this layer signs, absent for the innermost layer
    /// (which signs the protocol payload directly).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<MultiSignature>>,

    /// This layer's signature over `data` (or the payload if innermost).
    pub signature: Signature,
}

impl MultiSignature {
    /// The innermost layer, signing the payload itself.
    pub fn leaf(signature: Signature) -> Self {
        MultiSignature {
            data: None,
            signature,
        }
    }

    /// Add one attestation layer on top of this chain.
    pub fn wrap(self, signature: Signature) -> Self {
        MultiSignature {
            data: Some(Box::new(self)),
            signature,
        }
    }

    /// Number of layers in the chain (>= 1).
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut current = self;
        while let Some(inner) = &current.data {
            depth += 1;
            current = inner;
        }
        depth
    }

    /// Descend exactly `layers` layers, failing on a mismatched count in
    /// either direction.
    pub fn unwrap_layers(&self, layers: usize) -> Result<&MultiSignature, MultiSignatureError> {
        let mut current = self;
        for unwrapped in 0..layers {
            current = current
                .data
                .as_deref()
                .ok_or(MultiSignatureError::TooShallow {
                    expected: layers + 1,
                    actual: unwrapped + 1,
                })?;
        }
        Ok(current)
    }

    /// Like [`Self::unwrap_layers`], additionally requiring the target layer
    /// to be the innermost one.
    pub fn unwrap_exact(&self, layers: usize) -> Result<&MultiSignature, MultiSignatureError> {
        let target = self.unwrap_layers(layers)?;
        if target.data.is_some() {
            return Err(MultiSignatureError::TooDeep {
                expected: layers + 1,
            });
        }
        Ok(target)
    }
}
