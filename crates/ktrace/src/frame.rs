use crate::{TraceError, TraceRecord};

const FLAG: u8 = 0x7E;
const ESC: u8 = 0x7D;
const ESC_XOR: u8 = 0x20;

/// Bit set in the record-type byte when a timestamp follows it.
const TIMESTAMP_BIT: u8 = 0x80;

fn push_literal(dest: &mut Vec<u8>, byte: u8) {
    if byte == FLAG || byte == ESC {
        dest.push(ESC);
        dest.push(byte ^ ESC_XOR);
    } else {
        dest.push(byte);
    }
}

/// Encodes one record into a complete frame, trailing flag included.
///
/// Record identifiers must stay below `0x80`; the top bit of the type byte
/// announces a timestamp.
pub fn encode_frame(record: &TraceRecord) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(record.payload.len() + 10);
    let mut checksum: u8 = 0;

    let mut push = |dest: &mut Vec<u8>, byte: u8| {
        checksum = checksum.wrapping_add(byte);
        push_literal(dest, byte);
    };

    push(&mut bytes, record.seq);
    let type_byte = match record.timestamp {
        Some(_) => record.record_type | TIMESTAMP_BIT,
        None => record.record_type & !TIMESTAMP_BIT,
    };
    push(&mut bytes, type_byte);

    if let Some(ts) = record.timestamp {
        for byte in ts.to_le_bytes() {
            push(&mut bytes, byte);
        }
    }

    for &byte in &record.payload {
        push(&mut bytes, byte);
    }

    push_literal(&mut bytes, !checksum);
    bytes.push(FLAG);
    bytes
}

/// Decodes a single frame produced by [`encode_frame`]. The trailing flag is
/// optional.
pub fn decode_frame(frame: &[u8]) -> Result<TraceRecord, TraceError> {
    let body = match frame.split_last() {
        Some((&FLAG, rest)) => rest,
        _ => frame,
    };

    let mut raw = Vec::with_capacity(body.len());
    let mut iter = body.iter();
    while let Some(&byte) = iter.next() {
        match byte {
            FLAG => return Err(TraceError::Malformed("flag inside frame body")),
            ESC => {
                let next = iter
                    .next()
                    .ok_or(TraceError::Malformed("dangling escape"))?;
                raw.push(next ^ ESC_XOR);
            }
            other => raw.push(other),
        }
    }

    let (&checksum, content) = raw
        .split_last()
        .ok_or(TraceError::Malformed("empty frame"))?;
    let sum = content.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if !sum != checksum {
        return Err(TraceError::Malformed("checksum mismatch"));
    }

    let [seq, type_byte, rest @ ..] = content else {
        return Err(TraceError::Malformed("truncated header"));
    };

    let (timestamp, payload) = if type_byte & TIMESTAMP_BIT != 0 {
        if rest.len() < 4 {
            return Err(TraceError::Malformed("truncated timestamp"));
        }
        let (ts, payload) = rest.split_at(4);
        (Some(u32::from_le_bytes([ts[0], ts[1], ts[2], ts[3]])), payload)
    } else {
        (None, rest)
    };

    Ok(TraceRecord {
        seq: *seq,
        record_type: type_byte & !TIMESTAMP_BIT,
        timestamp,
        payload: payload.to_vec(),
    })
}

/// Splits a byte stream into frames on the flag byte. An incomplete tail is
/// returned separately so a reader can carry it into the next chunk.
pub fn split_frames(stream: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut frames = Vec::new();
    let mut start = 0;
    for (idx, &byte) in stream.iter().enumerate() {
        if byte == FLAG {
            if idx > start {
                frames.push(&stream[start..=idx]);
            }
            start = idx + 1;
        }
    }
    (frames, &stream[start..])
}
