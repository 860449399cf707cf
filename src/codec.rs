//! Shared plumbing for the per-layer codecs (BVLL, NPDU, APDU).
//!
//! Every codec reads big-endian fields through a `Cursor<&[u8]>` with `byteorder`; a short
//! read surfaces as [`CodecError::Io`] with `UnexpectedEof`.

use crate::address::Address;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation: {0}")]
    Validation(String),
    #[error("Length mismatch: declared {declared}, actual {actual}")]
    Length { declared: usize, actual: usize },
    #[error("Unknown type: {0}")]
    UnknownType(u8),
    /// No service-parameter sequence can be built for this header. Only this variant is
    /// tolerated when refining an application header.
    #[error("No service sequence: {0}")]
    NoSequence(String),
}

impl CodecError {
    pub fn is_truncation(&self) -> bool {
        matches!(self, CodecError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub(crate) type Reader<'a> = Cursor<&'a [u8]>;

pub(crate) fn read_vec(r: &mut Reader<'_>, n: usize) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Everything from the cursor position to the end of the buffer.
pub(crate) fn rest(r: &Reader<'_>) -> Vec<u8> {
    let data = *r.get_ref();
    let pos = (r.position() as usize).min(data.len());
    data[pos..].to_vec()
}

pub(crate) fn remaining(r: &Reader<'_>) -> usize {
    r.get_ref().len().saturating_sub(r.position() as usize)
}

/// Six-octet B/IP address (IPv4 + port).
pub(crate) fn read_bip(r: &mut Reader<'_>) -> Result<Address, CodecError> {
    let mut octets = [0u8; 6];
    r.read_exact(&mut octets)?;
    Ok(Address::from_bip(&octets))
}

pub(crate) fn read_u16_list(r: &mut Reader<'_>) -> Result<Vec<u16>, CodecError> {
    if remaining(r) % 2 != 0 {
        return Err(CodecError::Validation(format!(
            "network list has odd length {}",
            remaining(r)
        )));
    }
    let mut out = Vec::with_capacity(remaining(r) / 2);
    while remaining(r) > 0 {
        out.push(r.read_u16::<BigEndian>()?);
    }
    Ok(out)
}

/// Fail unless the body was consumed exactly.
pub(crate) fn expect_end(r: &Reader<'_>, what: &str) -> Result<(), CodecError> {
    match remaining(r) {
        0 => Ok(()),
        n => Err(CodecError::Validation(format!("{}: {} trailing bytes", what, n))),
    }
}
