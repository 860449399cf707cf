//! Lazy packet streams over capture records.
//!
//! Each record is decoded when pulled. Records with nothing to decode, and records whose
//! decode faults, are skipped; the stream carries on with the next one.

use crate::error::DecodeError;
use crate::pipeline::{DecodedPacket, DeepestPacket, Pipeline, RawRecord};

type DecodeFn<T> = fn(&Pipeline, &RawRecord) -> Result<Option<T>, DecodeError>;

pub struct Packets<I, T> {
    records: I,
    pipeline: Pipeline,
    decode: DecodeFn<T>,
    read: u64,
    empty: u64,
    faulted: u64,
}

impl<I, T> Packets<I, T> {
    fn new(records: I, pipeline: Pipeline, decode: DecodeFn<T>) -> Self {
        Packets {
            records,
            pipeline,
            decode,
            read: 0,
            empty: 0,
            faulted: 0,
        }
    }

    /// Records pulled from the underlying source so far.
    pub fn records_read(&self) -> u64 {
        self.read
    }

    /// Records that decoded to an empty payload.
    pub fn records_empty(&self) -> u64 {
        self.empty
    }

    /// Records dropped because their decode faulted.
    pub fn records_faulted(&self) -> u64 {
        self.faulted
    }
}

impl<I, T> Iterator for Packets<I, T>
where
    I: Iterator<Item = RawRecord>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            let record = self.records.next()?;
            self.read += 1;
            match (self.decode)(&self.pipeline, &record) {
                Ok(Some(packet)) => return Some(packet),
                Ok(None) => {
                    log::trace!("packet {}: nothing to decode", record.number);
                    self.empty += 1;
                }
                Err(e) => {
                    log::warn!("exception decoding packet {}: {}", record.number, e);
                    self.faulted += 1;
                }
            }
        }
    }
}

/// Full multi-layer decode of every record.
pub fn packets<I>(records: I, pipeline: Pipeline) -> Packets<I::IntoIter, DecodedPacket>
where
    I: IntoIterator<Item = RawRecord>,
{
    Packets::new(records.into_iter(), pipeline, Pipeline::decode_full)
}

/// Deepest-layer decode of every record.
pub fn deepest_packets<I>(records: I, pipeline: Pipeline) -> Packets<I::IntoIter, DeepestPacket>
where
    I: IntoIterator<Item = RawRecord>,
{
    Packets::new(records.into_iter(), pipeline, Pipeline::decode_deepest)
}
