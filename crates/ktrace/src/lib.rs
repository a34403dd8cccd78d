//! Binary trace records for the TOS kernel with pluggable backends.
//!
//! Every record carries a wrapping sequence number, a record identifier, an
//! optional microsecond timestamp and a short payload. Records travel in
//! HDLC-style frames: the body is byte-stuffed (`0x7E`/`0x7D` are escaped),
//! followed by a one's-complement checksum and a closing flag byte. The
//! encoder lives in [`Tracer`]; [`decode_frame`] reverses it for tests and
//! host tools.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

mod frame;

pub mod records;

pub use frame::{decode_frame, encode_frame, split_frames};

/// Maximum payload length for a single record (excluding header/checksum).
pub const DEFAULT_MAX_RECORD_LEN: usize = 64;

/// Configuration for the tracer.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub max_record_len: usize,
    pub include_timestamp: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            include_timestamp: true,
        }
    }
}

/// A single decoded or freshly encoded trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub seq: u8,
    pub record_type: u8,
    /// Microseconds since the tracer was created, truncated to 32 bits.
    pub timestamp: Option<u32>,
    pub payload: Vec<u8>,
}

/// Errors that can occur while emitting or decoding trace data.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("backend error: {0}")]
    Backend(#[from] io::Error),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Backend trait that consumes framed bytes.
pub trait TraceBackend: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError>;
}

/// Backend that writes frames to any `Write` implementation.
pub struct WriterBackend<W: Write + Send + 'static> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> WriterBackend<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send + 'static> TraceBackend for WriterBackend<W> {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        let mut guard = self.writer.lock();
        guard.write_all(frame)?;
        guard.flush().map_err(TraceError::from)
    }
}

/// Backend keeping every frame in memory.
///
/// Clones share the same buffer, so a test can hand one clone to the tracer
/// and inspect the other.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all frames captured so far.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    /// Decodes every captured frame, skipping none. Fails on the first
    /// malformed frame.
    pub fn records(&self) -> Result<Vec<TraceRecord>, TraceError> {
        self.frames.lock().iter().map(|f| decode_frame(f)).collect()
    }
}

impl TraceBackend for MemoryBackend {
    fn write_frame(&self, frame: &[u8]) -> Result<(), TraceError> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}

/// Trace frame encoder.
pub struct Tracer<B: TraceBackend> {
    backend: B,
    cfg: TraceConfig,
    seq: u8,
    epoch: Instant,
}

/// Shared handle to a [`Tracer`], convertible into a [`TraceHook`].
pub struct TracerHandle<B: TraceBackend> {
    inner: Arc<Mutex<Tracer<B>>>,
}

impl<B: TraceBackend> Clone for TracerHandle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: TraceBackend> Tracer<B> {
    pub fn new(cfg: TraceConfig, backend: B) -> Self {
        Self {
            backend,
            cfg,
            seq: 0,
            epoch: Instant::now(),
        }
    }

    pub fn into_handle(self) -> TracerHandle<B> {
        TracerHandle {
            inner: Arc::new(Mutex::new(self)),
        }
    }

    pub fn record(
        &mut self,
        record_type: u8,
        payload: &[u8],
        with_timestamp: bool,
    ) -> Result<TraceRecord, TraceError> {
        if payload.len() > self.cfg.max_record_len {
            return Err(TraceError::PayloadTooLarge(payload.len()));
        }

        let timestamp = if self.cfg.include_timestamp && with_timestamp {
            Some(self.epoch.elapsed().as_micros() as u32)
        } else {
            None
        };

        self.seq = self.seq.wrapping_add(1);
        let record = TraceRecord {
            seq: self.seq,
            record_type,
            timestamp,
            payload: payload.to_vec(),
        };

        self.backend.write_frame(&encode_frame(&record))?;
        Ok(record)
    }
}

impl<B: TraceBackend + 'static> TracerHandle<B> {
    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |record_type, payload, with_timestamp| {
            inner
                .lock()
                .record(record_type, payload, with_timestamp)
                .map(|_| ())
        })
    }
}

/// Callback used by the kernel to emit records: `(record_type, payload,
/// with_timestamp)`.
pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> Result<(), TraceError> + Send + Sync>;
