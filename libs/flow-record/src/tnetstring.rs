//! Tnetstring codec for flow dumps.
//!
//! Saved flow dumps are a concatenation of tnetstrings, one per flow:
//! `<length>:<payload><tag>` where the tag selects the payload type.

use std::collections::BTreeMap;

use nom::{
    bytes::complete::take,
    character::complete::{char, digit1},
    combinator::map_res,
    error::ErrorKind,
    number::complete::be_u8,
    sequence::terminated,
    IResult,
};
use thiserror::Error;

use crate::value::{escape_bytes, FlowValue};

/// Nesting limit applied while decoding.
pub const MAX_DECODE_DEPTH: usize = 64;

/// Longest length prefix accepted before the `:` separator.
const MAX_PREFIX_DIGITS: usize = 20;

#[derive(Debug, Error, PartialEq)]
pub enum TnetstringError {
    #[error("input ended before the tnetstring was complete")]
    Truncated,

    #[error("malformed tnetstring envelope ({0:?})")]
    Malformed(ErrorKind),

    #[error("unknown type tag {0:?}")]
    UnknownTag(char),

    #[error("invalid {kind} payload: {payload}")]
    InvalidPayload { kind: &'static str, payload: String },

    #[error("dictionary key must be text, got {0}")]
    InvalidKey(&'static str),

    #[error("nesting deeper than {} levels", MAX_DECODE_DEPTH)]
    MaxDepthExceeded,
}

type Res<'a, T> = IResult<&'a [u8], T>;

fn length_prefix(input: &[u8]) -> Res<'_, usize> {
    map_res(terminated(digit1, char(':')), |digits: &[u8]| {
        String::from_utf8_lossy(digits).parse::<usize>()
    })(input)
}

fn envelope(input: &[u8]) -> Res<'_, (&[u8], u8)> {
    let (input, len) = length_prefix(input)?;
    let (input, payload) = take(len)(input)?;
    let (input, tag) = be_u8(input)?;
    Ok((input, (payload, tag)))
}

/// Size in bytes of the first tnetstring in `input`, envelope included.
///
/// Returns `Ok(None)` while `input` holds only part of it, so a stream can
/// be framed before decoding. The payload itself is not validated.
pub fn frame_len(input: &[u8]) -> Result<Option<usize>, TnetstringError> {
    match length_prefix(input) {
        Ok((rest, len)) => {
            let total = (input.len() - rest.len())
                .checked_add(len)
                .and_then(|total| total.checked_add(1))
                .ok_or(TnetstringError::Malformed(ErrorKind::TooLarge))?;
            Ok((input.len() >= total).then_some(total))
        }
        Err(nom::Err::Error(e)) if e.input.is_empty() => {
            if input.len() > MAX_PREFIX_DIGITS {
                Err(TnetstringError::Malformed(ErrorKind::TooLarge))
            } else {
                Ok(None)
            }
        }
        Err(nom::Err::Incomplete(_)) => Ok(None),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(TnetstringError::Malformed(e.code)),
    }
}

/// Decodes one value from the front of `input`, returning it together with
/// the unconsumed remainder.
pub fn parse(input: &[u8]) -> Result<(FlowValue, &[u8]), TnetstringError> {
    decode(input, 0)
}

fn decode(input: &[u8], depth: usize) -> Result<(FlowValue, &[u8]), TnetstringError> {
    if depth > MAX_DECODE_DEPTH {
        return Err(TnetstringError::MaxDepthExceeded);
    }

    let (rest, (payload, tag)) = envelope(input).map_err(|err| match err {
        nom::Err::Incomplete(_) => TnetstringError::Truncated,
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            if e.input.is_empty() || e.code == ErrorKind::Eof {
                TnetstringError::Truncated
            } else {
                TnetstringError::Malformed(e.code)
            }
        }
    })?;

    let value = match tag {
        b',' => FlowValue::Bytes(payload.to_vec()),
        b';' => FlowValue::Str(text_payload("text", payload)?),
        b'#' => {
            let text = text_payload("integer", payload)?;
            let int = text.parse::<i64>().map_err(|_| invalid("integer", payload))?;
            FlowValue::Int(int)
        }
        b'^' => {
            let text = text_payload("float", payload)?;
            let float = text.parse::<f64>().map_err(|_| invalid("float", payload))?;
            FlowValue::Float(float)
        }
        b'!' => match payload {
            b"true" => FlowValue::Bool(true),
            b"false" => FlowValue::Bool(false),
            _ => return Err(invalid("boolean", payload)),
        },
        b'~' => {
            if !payload.is_empty() {
                return Err(invalid("null", payload));
            }
            FlowValue::Null
        }
        b']' => {
            let mut items = Vec::new();
            let mut remaining = payload;
            while !remaining.is_empty() {
                let (item, next) = decode(remaining, depth + 1)?;
                items.push(item);
                remaining = next;
            }
            FlowValue::Seq(items)
        }
        b'}' => {
            let mut map = BTreeMap::new();
            let mut remaining = payload;
            while !remaining.is_empty() {
                let (key, next) = decode(remaining, depth + 1)?;
                let key = match key {
                    FlowValue::Str(s) => s,
                    FlowValue::Bytes(b) => {
                        String::from_utf8(b).unwrap_or_else(|e| escape_bytes(e.as_bytes()))
                    }
                    other => return Err(TnetstringError::InvalidKey(other.type_name())),
                };
                if next.is_empty() {
                    return Err(TnetstringError::Truncated);
                }
                let (value, next) = decode(next, depth + 1)?;
                map.insert(key, value);
                remaining = next;
            }
            FlowValue::Map(map)
        }
        other => return Err(TnetstringError::UnknownTag(other as char)),
    };

    Ok((value, rest))
}

fn text_payload(kind: &'static str, payload: &[u8]) -> Result<String, TnetstringError> {
    String::from_utf8(payload.to_vec()).map_err(|_| invalid(kind, payload))
}

fn invalid(kind: &'static str, payload: &[u8]) -> TnetstringError {
    TnetstringError::InvalidPayload {
        kind,
        payload: escape_bytes(payload),
    }
}

/// Encodes a value as a tnetstring.
pub fn encode(value: &FlowValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &FlowValue, out: &mut Vec<u8>) {
    let (payload, tag) = match value {
        FlowValue::Null => (Vec::new(), b'~'),
        FlowValue::Bool(b) => (b.to_string().into_bytes(), b'!'),
        FlowValue::Int(i) => (i.to_string().into_bytes(), b'#'),
        FlowValue::Float(f) => (format!("{f:?}").into_bytes(), b'^'),
        FlowValue::Str(s) => (s.as_bytes().to_vec(), b';'),
        FlowValue::Bytes(b) => (b.clone(), b','),
        FlowValue::Seq(items) => {
            let mut payload = Vec::new();
            for item in items {
                encode_into(item, &mut payload);
            }
            (payload, b']')
        }
        FlowValue::Map(map) => {
            let mut payload = Vec::new();
            for (key, item) in map {
                encode_into(&FlowValue::Str(key.clone()), &mut payload);
                encode_into(item, &mut payload);
            }
            (payload, b'}')
        }
    };

    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(&payload);
    out.push(tag);
}
