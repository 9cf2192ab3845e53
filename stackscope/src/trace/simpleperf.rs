//! Simpleperf `report_sample` trace decoding
//!
//! ## Container
//!
//! ```text
//! char magic[10] = "SIMPLEPERF"
//! u16  version   = 1                      (little endian)
//! repeat:
//!   u32    size                           (little endian, 0 terminates)
//!   Record [size bytes of protobuf]
//! ```
//!
//! Every `Record` holds exactly one of `Sample`, `LostSituation`, `File`,
//! `Thread` or `MetaInfo`. `File` and `Thread` records are written after the
//! samples that reference them, so samples are buffered and resolved once the
//! whole container has been read.
//!
//! ## Callchains
//!
//! `callchain[0]` is the sampled instruction, i.e. the innermost frame. The
//! parser keeps that order in [`LoggedSample`] and the sample log reverses it
//! before merging.
//!
//! Any framing violation is fatal: a broken record size makes every later
//! record unreadable.

use log::{debug, info, warn};
use prost::Message;
use std::collections::{BTreeMap, HashMap};

use crate::domain::{MethodId, Tid, Timestamp, TraceParseError};

use super::sample_log::{LoggedSample, SampleLog};
use super::{ParsedTrace, TraceFormat, TraceStats};

pub const MAGIC: &[u8; 10] = b"SIMPLEPERF";
pub const VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;

/// Namespace of frames whose binary has no `File` record.
pub const UNKNOWN_FILE: &str = "[unknown]";

// =============================================================================
// RECORDS (report_sample.proto)
// =============================================================================

#[derive(Clone, PartialEq, Message)]
pub struct Record {
    #[prost(oneof = "record::RecordData", tags = "1, 2, 3, 4, 5")]
    pub record_data: Option<record::RecordData>,
}

pub mod record {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum RecordData {
        #[prost(message, tag = "1")]
        Sample(super::Sample),
        #[prost(message, tag = "2")]
        Lost(super::LostSituation),
        #[prost(message, tag = "3")]
        File(super::File),
        #[prost(message, tag = "4")]
        Thread(super::Thread),
        #[prost(message, tag = "5")]
        MetaInfo(super::MetaInfo),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Sample {
    /// Monotonic clock time in nanoseconds.
    #[prost(uint64, tag = "1")]
    pub time: u64,
    #[prost(int32, tag = "2")]
    pub thread_id: i32,
    /// Innermost entry first.
    #[prost(message, repeated, tag = "3")]
    pub callchain: Vec<CallChainEntry>,
    #[prost(uint64, tag = "4")]
    pub event_count: u64,
    #[prost(uint32, tag = "5")]
    pub event_type_id: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct CallChainEntry {
    #[prost(uint64, tag = "1")]
    pub vaddr_in_file: u64,
    #[prost(uint32, tag = "2")]
    pub file_id: u32,
    /// Index into the file's symbol table, -1 when unresolved.
    #[prost(int32, tag = "3")]
    pub symbol_id: i32,
    #[prost(enumeration = "ExecutionType", tag = "4")]
    pub execution_type: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ExecutionType {
    NativeMethod = 0,
    InterpretedJvmMethod = 1,
    JitJvmMethod = 2,
    ArtMethod = 3,
}

#[derive(Clone, PartialEq, Message)]
pub struct LostSituation {
    #[prost(uint64, tag = "1")]
    pub sample_count: u64,
    #[prost(uint64, tag = "2")]
    pub lost_count: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct File {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub path: String,
    #[prost(string, repeated, tag = "3")]
    pub symbol: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub mangled_symbol: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Thread {
    #[prost(uint32, tag = "1")]
    pub thread_id: u32,
    #[prost(uint32, tag = "2")]
    pub process_id: u32,
    #[prost(string, tag = "3")]
    pub thread_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetaInfo {
    #[prost(string, repeated, tag = "1")]
    pub event_type: Vec<String>,
    #[prost(string, tag = "2")]
    pub app_package_name: String,
}

// =============================================================================
// SYMBOLS
// =============================================================================

/// Symbol tables of every `File` record, keyed by file id.
#[derive(Debug, Default)]
struct SymbolTable {
    files: HashMap<u32, File>,
}

impl SymbolTable {
    fn insert(&mut self, file: File) {
        self.files.insert(file.id, file);
    }

    /// Resolve a callchain entry to a method identity.
    ///
    /// `File::symbol` already holds demangled C++ names. Native symbols are
    /// still passed through `rustc_demangle`, which only rewrites Rust
    /// (legacy or v0) manglings and returns anything else unchanged.
    fn resolve(&self, entry: &CallChainEntry) -> MethodId {
        let Some(file) = self.files.get(&entry.file_id) else {
            return MethodId::new(hex_address(entry.vaddr_in_file), UNKNOWN_FILE);
        };

        let symbol = usize::try_from(entry.symbol_id)
            .ok()
            .and_then(|idx| file.symbol.get(idx))
            .filter(|symbol| !symbol.is_empty());
        let Some(symbol) = symbol else {
            return MethodId::new(hex_address(entry.vaddr_in_file), file.path.as_str());
        };

        match ExecutionType::try_from(entry.execution_type) {
            Ok(ExecutionType::NativeMethod) | Err(_) => {
                let demangled = format!("{:#}", rustc_demangle::demangle(symbol));
                MethodId::new(demangled, file.path.as_str())
            }
            Ok(_) => MethodId::from_qualified(symbol),
        }
    }
}

fn hex_address(vaddr: u64) -> String {
    format!("0x{vaddr:x}")
}

// =============================================================================
// PARSER
// =============================================================================

/// Whether `data` starts with the Simpleperf magic.
pub fn has_magic(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Decode a complete Simpleperf trace.
///
/// `process_hint` is the id of the profiled process; its main thread (tid ==
/// pid) is reported in [`ParsedTrace::main_thread`].
///
/// # Errors
/// Returns an error on a bad header, a record running past the end of the
/// data, or a record that is not valid protobuf
pub fn parse(data: &[u8], process_hint: Option<u32>) -> Result<ParsedTrace, TraceParseError> {
    check_header(data)?;

    let mut stats = TraceStats::default();
    let mut pending: Vec<Sample> = Vec::new();
    let mut symbols = SymbolTable::default();
    let mut thread_names: BTreeMap<Tid, String> = BTreeMap::new();
    let mut meta = MetaInfo::default();

    let mut offset = HEADER_LEN;
    let mut index = 0usize;
    loop {
        let remaining = data.len() - offset;
        if remaining == 0 {
            debug!("Trace ended without terminator after {index} records");
            break;
        }
        if remaining < 4 {
            return Err(TraceParseError::Truncated {
                offset,
                needed: 4,
                available: remaining,
            });
        }

        let size_bytes = [
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ];
        let size = u32::from_le_bytes(size_bytes) as usize;
        offset += 4;
        if size == 0 {
            let trailing = data.len() - offset;
            if trailing > 0 {
                debug!("Ignoring {trailing} bytes after trace terminator");
            }
            break;
        }

        let available = data.len() - offset;
        if size > available {
            return Err(TraceParseError::Truncated {
                offset: offset - 4,
                needed: size,
                available,
            });
        }

        let record = Record::decode(&data[offset..offset + size]).map_err(|source| {
            TraceParseError::Malformed {
                index,
                offset: offset - 4,
                source,
            }
        })?;
        offset += size;
        index += 1;
        stats.records += 1;

        match record.record_data {
            Some(record::RecordData::Sample(sample)) => {
                stats.samples += 1;
                pending.push(sample);
            }
            Some(record::RecordData::Lost(lost)) => {
                stats.lost_records += 1;
                stats.reported_samples += lost.sample_count;
                stats.lost_samples += lost.lost_count;
            }
            Some(record::RecordData::File(file)) => {
                stats.file_records += 1;
                debug!("File #{}: {} ({} symbols)", file.id, file.path, file.symbol.len());
                symbols.insert(file);
            }
            Some(record::RecordData::Thread(thread)) => {
                stats.thread_records += 1;
                thread_names.insert(Tid(thread.thread_id), thread.thread_name);
            }
            Some(record::RecordData::MetaInfo(info)) => {
                stats.meta_records += 1;
                meta = info;
            }
            None => {
                stats.unknown_records += 1;
                debug!("Skipping record #{index} of unknown type");
            }
        }
    }

    let mut log = SampleLog::new();
    for (tid, name) in &thread_names {
        log.set_thread_name(*tid, name.clone());
    }

    let mut start_time: Option<Timestamp> = None;
    let mut end_time: Option<Timestamp> = None;
    for sample in pending {
        if sample.callchain.is_empty() {
            stats.dropped_samples += 1;
            continue;
        }
        let Ok(tid) = u32::try_from(sample.thread_id) else {
            warn!("Dropping sample with invalid thread id {}", sample.thread_id);
            stats.dropped_samples += 1;
            continue;
        };

        let time = Timestamp(sample.time);
        start_time = Some(start_time.map_or(time, |t| t.min(time)));
        end_time = Some(end_time.map_or(time, |t| t.max(time)));

        let frames = sample
            .callchain
            .iter()
            .map(|entry| symbols.resolve(entry))
            .collect();
        log.push(LoggedSample {
            tid: Tid(tid),
            time,
            frames,
        });
    }

    if stats.lost_samples > 0 {
        warn!(
            "Simpleperf reported {} lost samples out of {}",
            stats.lost_samples, stats.reported_samples
        );
    }

    let built = log.build();
    let main_thread = process_hint.and_then(|pid| built.thread_keys.get(&Tid(pid)).cloned());

    info!(
        "Parsed simpleperf trace: {} records, {} samples ({} dropped), {} threads",
        stats.records,
        stats.samples,
        stats.dropped_samples,
        built.forest.len()
    );

    Ok(ParsedTrace {
        format: TraceFormat::Simpleperf,
        forest: built.forest,
        stats,
        start_time,
        end_time,
        threads: thread_names,
        app_package: Some(meta.app_package_name).filter(|name| !name.is_empty()),
        event_types: meta.event_type,
        main_thread,
    })
}

fn check_header(data: &[u8]) -> Result<(), TraceParseError> {
    if !has_magic(data) {
        let found = &data[..data.len().min(MAGIC.len())];
        return Err(TraceParseError::BadMagic {
            expected: String::from_utf8_lossy(MAGIC).into_owned(),
            found: String::from_utf8_lossy(found).into_owned(),
        });
    }
    if data.len() < HEADER_LEN {
        return Err(TraceParseError::Truncated {
            offset: MAGIC.len(),
            needed: 2,
            available: data.len() - MAGIC.len(),
        });
    }

    let version = u16::from_le_bytes([data[MAGIC.len()], data[MAGIC.len() + 1]]);
    if version != VERSION {
        return Err(TraceParseError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Encode records into a complete container (terminator included).
///
/// A record without payload encodes to zero bytes and would read back as the
/// terminator; callers only pass records with data set.
pub fn encode(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    for record in records {
        let body = record.encode_to_vec();
        let size = u32::try_from(body.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&body);
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}
