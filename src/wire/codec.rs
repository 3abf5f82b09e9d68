//! Streaming encoding of jobs and results.
//!
//! A job or result is a fixed sequence of fields. Each field is sent as a
//! header frame announcing how many nodes it covers, followed by data
//! frames carrying a batch of nodes each, so neither side ever buffers more
//! than one batch. Every frame payload starts with its field byte:
//!
//! ```text
//! header  [field][present u8][node count u32]
//! values  [field][value]*                     per-node scalars
//! rows    [field]([row len u32][value]*)*     per-node liability rows
//! scalar  [field][u32]                        iteration id
//! error   [0x7F][error kind u8][utf-8 message]
//! ```
//!
//! Jobs are sent as liability amounts, liability counterparties, cash
//! flow, liquid assets and iteration id; results as equity, default order,
//! payment vector, payment matrix amounts, payment matrix counterparties and
//! iteration id. All integers and floats are big-endian.

use crate::core::job::ClearingJob;
use crate::core::liability::{Liability, LiabilityGraph};
use crate::core::node::Node;
use crate::core::result::ClearingResult;
use crate::error::{Error, ErrorKind, Result};
use crate::wire::frame::{Compression, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_LEN};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// Cap on up-front allocation from a declared node count.
const PREALLOC_LIMIT: usize = 1 << 16;

/// Identifies which logical field a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Field {
    LiabilityAmounts = 0x01,
    LiabilityCounterparties = 0x02,
    CashFlow = 0x03,
    LiquidAssets = 0x04,
    Iteration = 0x05,
    Equity = 0x11,
    DefaultOrder = 0x12,
    PaymentVector = 0x13,
    PaymentAmounts = 0x14,
    PaymentCounterparties = 0x15,
    ResultIteration = 0x16,
    Error = 0x7F,
}

impl Field {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let field = match byte {
            0x01 => Field::LiabilityAmounts,
            0x02 => Field::LiabilityCounterparties,
            0x03 => Field::CashFlow,
            0x04 => Field::LiquidAssets,
            0x05 => Field::Iteration,
            0x11 => Field::Equity,
            0x12 => Field::DefaultOrder,
            0x13 => Field::PaymentVector,
            0x14 => Field::PaymentAmounts,
            0x15 => Field::PaymentCounterparties,
            0x16 => Field::ResultIteration,
            0x7F => Field::Error,
            _ => return None,
        };
        Some(field)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How data frames are batched and compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecOptions {
    /// Compression applied to data frames. Header, scalar and error frames
    /// are always sent plain.
    pub compression: Compression,
    /// Liability rows per data frame.
    pub nodes_per_frame: usize,
    /// Per-node scalars per data frame.
    pub values_per_frame: usize,
    /// Largest frame either side will send or accept.
    pub max_frame_len: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Gzip,
            nodes_per_frame: 256,
            values_per_frame: 8192,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Fixed-width values that travel in data frames.
trait WireValue: Copy + 'static {
    const SIZE: usize;
    fn put(self, buf: &mut Vec<u8>);
    fn get(bytes: &[u8]) -> Self;
}

impl WireValue for f64 {
    const SIZE: usize = 8;

    fn put(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }

    fn get(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        f64::from_be_bytes(raw)
    }
}

impl WireValue for u32 {
    const SIZE: usize = 4;

    fn put(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_be_bytes());
    }

    fn get(bytes: &[u8]) -> Self {
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

fn node_count(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::protocol(format!("{} entries exceed the u32 range", len)))
}

/// Writes jobs, results and error reports as frames.
pub struct Encoder<W: Write> {
    frames: FrameWriter<W>,
    options: CodecOptions,
    scratch: Vec<u8>,
}

impl<W: Write> Encoder<W> {
    pub fn new(inner: W, options: CodecOptions) -> Self {
        Self {
            frames: FrameWriter::new(inner, options.max_frame_len),
            options,
            scratch: Vec::new(),
        }
    }

    pub fn write_job(&mut self, job: &ClearingJob) -> Result<()> {
        self.write_graph(&job.liability_graph)?;
        self.write_cash_flow(&job.cash_flow)?;
        self.write_values(Field::LiquidAssets, job.liquid_assets.as_deref())?;
        self.write_scalar(Field::Iteration, job.iteration)?;
        self.frames.flush()?;
        debug!(
            "sent job {} ({} nodes) in {} frames, {} bytes",
            job.iteration,
            job.node_count(),
            self.frames.frames(),
            self.frames.bytes()
        );
        Ok(())
    }

    pub fn write_result(&mut self, result: &ClearingResult) -> Result<()> {
        self.write_values(Field::Equity, Some(result.equity_of_node.as_slice()))?;
        self.write_values(Field::DefaultOrder, Some(result.default_order_of_node.as_slice()))?;
        self.write_values(Field::PaymentVector, Some(result.clearing_payment_vector.as_slice()))?;
        self.write_rows(Field::PaymentAmounts, &result.clearing_payment_matrix, |l| {
            l.amount
        })?;
        self.write_rows(
            Field::PaymentCounterparties,
            &result.clearing_payment_matrix,
            |l| l.counterparty.as_u32(),
        )?;
        self.write_scalar(Field::ResultIteration, result.iteration)?;
        self.frames.flush()?;
        debug!(
            "sent result {} ({} nodes) in {} frames, {} bytes",
            result.iteration,
            result.node_count(),
            self.frames.frames(),
            self.frames.bytes()
        );
        Ok(())
    }

    /// Report a failure to the peer in place of a result.
    pub fn write_error(&mut self, kind: ErrorKind, message: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(2 + message.len());
        payload.push(Field::Error as u8);
        payload.push(kind.code());
        payload.extend_from_slice(message.as_bytes());
        self.frames.write_frame(&payload, Compression::None)?;
        self.frames.flush()
    }

    /// Liability amounts then counterparties, one row per node.
    pub fn write_graph(&mut self, graph: &LiabilityGraph) -> Result<()> {
        self.write_rows(Field::LiabilityAmounts, graph, |l| l.amount)?;
        self.write_rows(Field::LiabilityCounterparties, graph, |l| {
            l.counterparty.as_u32()
        })
    }

    pub fn write_cash_flow(&mut self, cash_flow: &[f64]) -> Result<()> {
        self.write_values(Field::CashFlow, Some(cash_flow))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.frames.flush()
    }

    pub fn into_inner(self) -> W {
        self.frames.into_inner()
    }

    fn write_header(&mut self, field: Field, count: Option<usize>) -> Result<()> {
        let mut payload = [0u8; 6];
        payload[0] = field as u8;
        if let Some(count) = count {
            payload[1] = 1;
            payload[2..].copy_from_slice(&node_count(count)?.to_be_bytes());
        }
        self.frames.write_frame(&payload, Compression::None)
    }

    fn write_scalar(&mut self, field: Field, value: u32) -> Result<()> {
        let mut payload = [0u8; 5];
        payload[0] = field as u8;
        payload[1..].copy_from_slice(&value.to_be_bytes());
        self.frames.write_frame(&payload, Compression::None)
    }

    fn write_values<T: WireValue>(&mut self, field: Field, values: Option<&[T]>) -> Result<()> {
        self.write_header(field, values.map(<[T]>::len))?;
        let Some(values) = values else {
            return Ok(());
        };
        let fit = (self.options.max_frame_len.saturating_sub(1) / T::SIZE).max(1);
        let batch = self.options.values_per_frame.clamp(1, fit);
        for chunk in values.chunks(batch) {
            self.scratch.clear();
            self.scratch.push(field as u8);
            for &value in chunk {
                value.put(&mut self.scratch);
            }
            self.frames.write_frame(&self.scratch, self.options.compression)?;
        }
        Ok(())
    }

    /// Rows are batched by `nodes_per_frame`, and a frame is also cut early
    /// when the next row would push it past `max_frame_len`.
    fn write_rows<T, F>(&mut self, field: Field, graph: &LiabilityGraph, value: F) -> Result<()>
    where
        T: WireValue,
        F: Fn(&Liability) -> T,
    {
        self.write_header(field, Some(graph.len()))?;
        let batch = self.options.nodes_per_frame.max(1);
        let limit = self.options.max_frame_len;
        let mut pending = 0;
        self.scratch.clear();
        self.scratch.push(field as u8);
        for row in graph.rows() {
            let row_len = 4 + row.len() * T::SIZE;
            if pending > 0 && self.scratch.len() + row_len > limit {
                self.frames.write_frame(&self.scratch, self.options.compression)?;
                self.scratch.clear();
                self.scratch.push(field as u8);
                pending = 0;
            }
            self.scratch.extend_from_slice(&node_count(row.len())?.to_be_bytes());
            for liability in row {
                value(liability).put(&mut self.scratch);
            }
            pending += 1;
            if pending == batch {
                self.frames.write_frame(&self.scratch, self.options.compression)?;
                self.scratch.clear();
                self.scratch.push(field as u8);
                pending = 0;
            }
        }
        if pending > 0 {
            self.frames.write_frame(&self.scratch, self.options.compression)?;
        }
        Ok(())
    }
}

/// Header frame contents.
struct Header {
    present: bool,
    count: usize,
}

/// Bounds-checked reads over one frame's payload.
struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.bytes.len() {
            return Err(Error::protocol(format!(
                "frame truncated: needed {} bytes, {} left",
                len,
                self.bytes.len()
            )));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::get(self.take(4)?))
    }

    /// Next row: its length prefix, then that many values.
    fn row<T: WireValue>(&mut self) -> Result<impl Iterator<Item = T> + 'a> {
        let len = self.u32()? as usize;
        let size = len
            .checked_mul(T::SIZE)
            .ok_or_else(|| Error::protocol(format!("row of {} entries overflows", len)))?;
        Ok(self.take(size)?.chunks_exact(T::SIZE).map(T::get))
    }
}

/// Reads jobs, results and error reports from frames.
pub struct Decoder<R: Read> {
    frames: FrameReader<R>,
}

impl<R: Read> Decoder<R> {
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self {
            frames: FrameReader::new(inner, max_frame_len),
        }
    }

    pub fn read_job(&mut self) -> Result<ClearingJob> {
        let liability_graph = self.read_graph()?;
        let cash_flow = self.read_cash_flow()?;
        let liquid_assets = self.read_values(Field::LiquidAssets)?;
        let iteration = self.read_scalar(Field::Iteration)?;
        debug!(
            "received job {} ({} nodes) in {} frames",
            iteration,
            liability_graph.len(),
            self.frames.frames()
        );
        Ok(ClearingJob {
            liability_graph,
            cash_flow,
            liquid_assets,
            iteration,
        })
    }

    /// Read a result, or the error the peer sent in its place.
    pub fn read_result(&mut self) -> Result<ClearingResult> {
        let equity_of_node = self.read_required(Field::Equity)?;
        let default_order_of_node = self.read_required(Field::DefaultOrder)?;
        let clearing_payment_vector = self.read_required(Field::PaymentVector)?;
        let clearing_payment_matrix =
            self.read_rows(Field::PaymentAmounts, Field::PaymentCounterparties)?;
        let iteration = self.read_scalar(Field::ResultIteration)?;

        let nodes = clearing_payment_matrix.len();
        for (field, len) in [
            (Field::Equity, equity_of_node.len()),
            (Field::DefaultOrder, default_order_of_node.len()),
            (Field::PaymentVector, clearing_payment_vector.len()),
        ] {
            if len != nodes {
                return Err(Error::protocol(format!(
                    "{} has {} entries but the payment matrix has {} rows",
                    field, len, nodes
                )));
            }
        }
        debug!(
            "received result {} ({} nodes) in {} frames",
            iteration,
            nodes,
            self.frames.frames()
        );
        Ok(ClearingResult {
            equity_of_node,
            default_order_of_node,
            clearing_payment_vector,
            clearing_payment_matrix,
            iteration,
        })
    }

    pub fn read_graph(&mut self) -> Result<LiabilityGraph> {
        self.read_rows(Field::LiabilityAmounts, Field::LiabilityCounterparties)
    }

    pub fn read_cash_flow(&mut self) -> Result<Vec<f64>> {
        self.read_required(Field::CashFlow)
    }

    /// Next frame, which must belong to `expected`. An error frame from the
    /// peer is surfaced as [`Error::Remote`].
    fn next_frame(&mut self, expected: Field) -> Result<Vec<u8>> {
        let frame = self.frames.read_frame()?;
        let Some(&first) = frame.first() else {
            return Err(Error::protocol(format!("empty frame while reading {}", expected)));
        };
        match Field::from_byte(first) {
            Some(field) if field == expected => Ok(frame),
            Some(Field::Error) => Err(remote_error(&frame[1..])),
            Some(field) => Err(Error::protocol(format!(
                "expected {} frame, found {}",
                expected, field
            ))),
            None => Err(Error::protocol(format!(
                "expected {} frame, found unknown field 0x{:02x}",
                expected, first
            ))),
        }
    }

    fn read_header(&mut self, field: Field) -> Result<Header> {
        let frame = self.next_frame(field)?;
        if frame.len() != 6 {
            return Err(Error::protocol(format!(
                "{} header is {} bytes, expected 6",
                field,
                frame.len()
            )));
        }
        let present = match frame[1] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::protocol(format!(
                    "{} header has presence flag {}",
                    field, other
                )))
            }
        };
        let count = u32::get(&frame[2..]) as usize;
        if !present && count != 0 {
            return Err(Error::protocol(format!(
                "absent {} declares {} entries",
                field, count
            )));
        }
        Ok(Header { present, count })
    }

    fn read_scalar(&mut self, field: Field) -> Result<u32> {
        let frame = self.next_frame(field)?;
        if frame.len() != 5 {
            return Err(Error::protocol(format!(
                "{} frame is {} bytes, expected 5",
                field,
                frame.len()
            )));
        }
        Ok(u32::get(&frame[1..]))
    }

    fn read_required<T: WireValue>(&mut self, field: Field) -> Result<Vec<T>> {
        self.read_values(field)?
            .ok_or_else(|| Error::protocol(format!("required field {} is absent", field)))
    }

    fn read_values<T: WireValue>(&mut self, field: Field) -> Result<Option<Vec<T>>> {
        let header = self.read_header(field)?;
        if !header.present {
            return Ok(None);
        }
        let mut values = Vec::with_capacity(header.count.min(PREALLOC_LIMIT));
        while values.len() < header.count {
            let frame = self.next_frame(field)?;
            let body = &frame[1..];
            if body.is_empty() || body.len() % T::SIZE != 0 {
                return Err(Error::protocol(format!(
                    "{} data frame of {} bytes is not a whole number of values",
                    field,
                    body.len()
                )));
            }
            if values.len() + body.len() / T::SIZE > header.count {
                return Err(Error::protocol(format!(
                    "{} carries more than the {} declared entries",
                    field, header.count
                )));
            }
            values.extend(body.chunks_exact(T::SIZE).map(T::get));
        }
        Ok(Some(values))
    }

    /// Amount rows are decoded first into liabilities with placeholder
    /// counterparties, which the counterparty rows then fill in place.
    fn read_rows(&mut self, amounts: Field, counterparties: Field) -> Result<LiabilityGraph> {
        let header = self.read_header(amounts)?;
        if !header.present {
            return Err(Error::protocol(format!("required field {} is absent", amounts)));
        }
        let nodes = header.count;
        let mut rows: Vec<Vec<Liability>> = Vec::with_capacity(nodes.min(PREALLOC_LIMIT));
        while rows.len() < nodes {
            let frame = self.next_frame(amounts)?;
            let mut cursor = Cursor::new(&frame[1..]);
            if cursor.is_empty() {
                return Err(Error::protocol(format!("empty {} data frame", amounts)));
            }
            while !cursor.is_empty() {
                if rows.len() == nodes {
                    return Err(Error::protocol(format!(
                        "{} carries more than the {} declared rows",
                        amounts, nodes
                    )));
                }
                let row = cursor
                    .row::<f64>()?
                    .map(|amount| Liability::new(0, amount))
                    .collect();
                rows.push(row);
            }
        }

        let header = self.read_header(counterparties)?;
        if !header.present || header.count != nodes {
            return Err(Error::invalid(format!(
                "{} rows of amounts but {} rows of counterparties",
                nodes, header.count
            )));
        }
        let mut node = 0;
        while node < nodes {
            let frame = self.next_frame(counterparties)?;
            let mut cursor = Cursor::new(&frame[1..]);
            if cursor.is_empty() {
                return Err(Error::protocol(format!("empty {} data frame", counterparties)));
            }
            while !cursor.is_empty() {
                let Some(row) = rows.get_mut(node) else {
                    return Err(Error::protocol(format!(
                        "{} carries more than the {} declared rows",
                        counterparties, nodes
                    )));
                };
                let mut len = 0;
                for counterparty in cursor.row::<u32>()? {
                    if let Some(entry) = row.get_mut(len) {
                        entry.counterparty = Node::new(counterparty);
                    }
                    len += 1;
                }
                if len != row.len() {
                    return Err(Error::invalid(format!(
                        "node {} has {} amounts but a different number of counterparties",
                        node,
                        row.len()
                    )));
                }
                node += 1;
            }
        }
        Ok(LiabilityGraph::from_rows(rows))
    }
}

fn remote_error(body: &[u8]) -> Error {
    let Some((&code, message)) = body.split_first() else {
        return Error::protocol("empty error frame");
    };
    let Some(kind) = ErrorKind::from_code(code) else {
        return Error::protocol(format!("error frame with unknown kind {}", code));
    };
    Error::Remote {
        kind,
        message: String::from_utf8_lossy(message).into_owned(),
    }
}

/// Encode a job into an in-memory buffer.
pub fn encode_job(job: &ClearingJob, options: CodecOptions) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(Vec::new(), options);
    encoder.write_job(job)?;
    Ok(encoder.into_inner())
}

pub fn decode_job(bytes: &[u8], max_frame_len: usize) -> Result<ClearingJob> {
    Decoder::new(bytes, max_frame_len).read_job()
}

/// Encode a result into an in-memory buffer.
pub fn encode_result(result: &ClearingResult, options: CodecOptions) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(Vec::new(), options);
    encoder.write_result(result)?;
    Ok(encoder.into_inner())
}

pub fn decode_result(bytes: &[u8], max_frame_len: usize) -> Result<ClearingResult> {
    Decoder::new(bytes, max_frame_len).read_result()
}
