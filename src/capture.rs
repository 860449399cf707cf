//! Capture file reading (legacy pcap and pcapng) into [`RawRecord`]s.
//!
//! The reader owns its input; dropping it, whether after the last record or part-way
//! through, releases the file.

use crate::pipeline::RawRecord;
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 1 << 20;

const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
const MICROS_PER_SEC: u64 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture i/o: {0}")]
    Io(#[from] io::Error),
    #[error("capture format: {0}")]
    Format(String),
}

/// Timestamp resolution of a legacy capture, from its magic number.
fn legacy_precision(magic: [u8; 4]) -> Option<u64> {
    match magic {
        [0xd4, 0xc3, 0xb2, 0xa1] | [0xa1, 0xb2, 0xc3, 0xd4] => Some(MICROS_PER_SEC),
        [0x4d, 0x3c, 0xb2, 0xa1] | [0xa1, 0xb2, 0x3c, 0x4d] => Some(1_000_000_000),
        _ => None,
    }
}

/// Units per second for a pcapng `if_tsresol` value: high bit set means a power of two.
fn tsresol_units(tsresol: u8) -> Option<u64> {
    let exp = u32::from(tsresol & 0x7f);
    if tsresol & 0x80 != 0 {
        1u64.checked_shl(exp)
    } else {
        10u64.checked_pow(exp)
    }
}

fn to_seconds(ticks: u64, units: u64) -> f64 {
    (ticks / units) as f64 + (ticks % units) as f64 / units as f64
}

type Input = Box<dyn Read>;

struct LegacyStream {
    reader: LegacyPcapReader<Input>,
    units: u64,
    linktype: Option<Linktype>,
}

impl LegacyStream {
    fn next_packet(&mut self) -> Result<Option<(f64, Vec<u8>)>, CaptureError> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let packet = match block {
                        PcapBlockOwned::LegacyHeader(h) => {
                            self.linktype = Some(h.network);
                            None
                        }
                        PcapBlockOwned::Legacy(b) => {
                            let ts = b.ts_sec as f64 + b.ts_usec as f64 / self.units as f64;
                            Some((ts, b.data.to_vec()))
                        }
                        PcapBlockOwned::NG(_) => None,
                    };
                    self.reader.consume(offset);
                    if packet.is_some() {
                        return Ok(packet);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    self.reader
                        .refill()
                        .map_err(|e| CaptureError::Format(format!("pcap refill error: {:?}", e)))?;
                }
                Err(e) => return Err(CaptureError::Format(format!("pcap read error: {:?}", e))),
            }
        }
    }
}

struct Interface {
    linktype: Linktype,
    units: u64,
}

struct NgStream {
    reader: PcapNGReader<Input>,
    interfaces: Vec<Interface>,
}

impl NgStream {
    fn next_packet(&mut self) -> Result<Option<(f64, Vec<u8>)>, CaptureError> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let mut packet = None;
                    if let PcapBlockOwned::NG(b) = block {
                        match &b {
                            PcapNgBlock::SectionHeader(_) => self.interfaces.clear(),
                            PcapNgBlock::InterfaceDescription(idb) => {
                                let units = tsresol_units(idb.if_tsresol).unwrap_or_else(|| {
                                    log::warn!(
                                        "interface {}: unusable if_tsresol {:#04x}, assuming microseconds",
                                        self.interfaces.len(),
                                        idb.if_tsresol
                                    );
                                    MICROS_PER_SEC
                                });
                                self.interfaces.push(Interface {
                                    linktype: idb.linktype,
                                    units,
                                });
                            }
                            PcapNgBlock::EnhancedPacket(epb) => {
                                let units = self
                                    .interfaces
                                    .get(epb.if_id as usize)
                                    .map_or(MICROS_PER_SEC, |i| i.units);
                                let ticks = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                                packet = Some((to_seconds(ticks, units), epb.packet_data().to_vec()));
                            }
                            PcapNgBlock::SimplePacket(spb) => {
                                packet = Some((0.0, spb.packet_data().to_vec()));
                            }
                            _ => {}
                        }
                    }
                    self.reader.consume(offset);
                    if packet.is_some() {
                        return Ok(packet);
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    self.reader
                        .refill()
                        .map_err(|e| CaptureError::Format(format!("pcapng refill error: {:?}", e)))?;
                }
                Err(e) => return Err(CaptureError::Format(format!("pcapng read error: {:?}", e))),
            }
        }
    }
}

enum Stream {
    Legacy(LegacyStream),
    Ng(NgStream),
}

/// Sequential reader over the frames of one capture.
pub struct CaptureReader {
    stream: Stream,
    number: u64,
    done: bool,
}

impl CaptureReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Probe the magic number and pick the legacy or pcapng parser.
    pub fn from_reader<R: Read + 'static>(mut input: R) -> Result<Self, CaptureError> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        let input: Input = Box::new(Cursor::new(magic).chain(input));

        let stream = if magic == PCAPNG_MAGIC {
            let reader = PcapNGReader::new(BUFFER_SIZE, input)
                .map_err(|e| CaptureError::Format(format!("pcapng header: {:?}", e)))?;
            Stream::Ng(NgStream {
                reader,
                interfaces: Vec::new(),
            })
        } else if let Some(units) = legacy_precision(magic) {
            let reader = LegacyPcapReader::new(BUFFER_SIZE, input)
                .map_err(|e| CaptureError::Format(format!("pcap header: {:?}", e)))?;
            Stream::Legacy(LegacyStream {
                reader,
                units,
                linktype: None,
            })
        } else {
            return Err(CaptureError::Format(format!("unknown magic number {:02x?}", magic)));
        };

        Ok(CaptureReader {
            stream,
            number: 0,
            done: false,
        })
    }

    /// Link type of the capture (first interface for pcapng), once its header has been read.
    pub fn linktype(&self) -> Option<Linktype> {
        match &self.stream {
            Stream::Legacy(s) => s.linktype,
            Stream::Ng(s) => s.interfaces.first().map(|i| i.linktype),
        }
    }

    /// Records handed out so far.
    pub fn records_read(&self) -> u64 {
        self.number
    }

    /// The plain record stream. A read error is logged and ends the stream.
    pub fn records(self) -> impl Iterator<Item = RawRecord> {
        self.map_while(|r| match r {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("capture read aborted: {}", e);
                None
            }
        })
    }
}

impl Iterator for CaptureReader {
    type Item = Result<RawRecord, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match &mut self.stream {
            Stream::Legacy(s) => s.next_packet(),
            Stream::Ng(s) => s.next_packet(),
        };
        match next {
            Ok(Some((timestamp, data))) => {
                self.number += 1;
                Some(Ok(RawRecord::new(self.number, timestamp, data)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
