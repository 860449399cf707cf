//! Faults that abort decoding of a single capture record.
//!
//! These are the unrecoverable cases: the pipeline cannot fall back to a coarser layer,
//! so the packet source drops the record and moves on.

use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{layer}: truncated header, need {needed} bytes, have {available}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{layer}: {reason}")]
    Malformed { layer: &'static str, reason: String },
    #[error("NPDU: {0}")]
    Network(#[source] CodecError),
    #[error("service parameters: {0}")]
    Service(#[source] CodecError),
}

impl DecodeError {
    pub(crate) fn check_len(layer: &'static str, data: &[u8], needed: usize) -> Result<(), DecodeError> {
        if data.len() < needed {
            return Err(DecodeError::Truncated {
                layer,
                needed,
                available: data.len(),
            });
        }
        Ok(())
    }
}
