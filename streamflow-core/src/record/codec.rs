//! Binary encoding of records.
//!
//! Layout (little endian):
//!
//! ```text
//! magic u32 | version u16 | position i64 | source position i64 | key i64
//! | timestamp i64 | partition u16 | record type u8 | value type u8 | intent u8
//! | rejection type u8 (0 = none) | request id i64 | distributed u8
//! | tenant | rejection reason | authorization (JSON) | value (JSON)
//! ```
//!
//! Variable sections are prefixed with their length as `u32`. Payloads are
//! JSON with defaults for every field, so new optional fields never break
//! older readers.

use super::{Intent, Record, RecordType, RecordValue, RejectionType, ValueType};
use crate::auth::AuthorizationContext;
use thiserror::Error;

pub const MAGIC: u32 = 0x5346_5243;
pub const VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 8 * 4 + 2 + 4 + 8 + 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("record truncated: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("bad magic {0:#x}")]
    BadMagic(u32),
    #[error("unsupported record version {0}")]
    UnsupportedVersion(u16),
    #[error("unknown value type code {0}")]
    UnknownValueType(u8),
    #[error("unknown record type code {0}")]
    UnknownRecordType(u8),
    #[error("unknown rejection type code {0}")]
    UnknownRejectionType(u8),
    #[error("invalid utf-8 in {0}")]
    Utf8(&'static str),
    #[error("invalid {section} payload: {source}")]
    Json {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    let authorization = serde_json::to_vec(&record.authorization).map_err(|source| {
        CodecError::Json {
            section: "authorization",
            source,
        }
    })?;
    let value = serde_json::to_vec(&record.value).map_err(|source| CodecError::Json {
        section: "value",
        source,
    })?;

    let mut buf = Vec::with_capacity(
        HEADER_LEN
            + 16
            + record.tenant_id.len()
            + record.rejection_reason.len()
            + authorization.len()
            + value.len(),
    );
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&record.position.to_le_bytes());
    buf.extend_from_slice(&record.source_record_position.to_le_bytes());
    buf.extend_from_slice(&record.key.to_le_bytes());
    buf.extend_from_slice(&record.timestamp.to_le_bytes());
    buf.extend_from_slice(&record.partition_id.to_le_bytes());
    buf.push(record.record_type.code());
    buf.push(record.value_type.code());
    buf.push(record.intent.code());
    buf.push(record.rejection_type.map(RejectionType::code).unwrap_or(0));
    buf.extend_from_slice(&record.request_id.to_le_bytes());
    buf.push(u8::from(record.distributed));
    put_section(&mut buf, record.tenant_id.as_bytes());
    put_section(&mut buf, record.rejection_reason.as_bytes());
    put_section(&mut buf, &authorization);
    put_section(&mut buf, &value);
    Ok(buf)
}

fn put_section(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

pub fn decode(bytes: &[u8]) -> Result<Record, CodecError> {
    let mut reader = Reader { bytes, offset: 0 };

    let magic = u32::from_le_bytes(reader.array()?);
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }
    let version = u16::from_le_bytes(reader.array()?);
    if version > VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let position = i64::from_le_bytes(reader.array()?);
    let source_record_position = i64::from_le_bytes(reader.array()?);
    let key = i64::from_le_bytes(reader.array()?);
    let timestamp = i64::from_le_bytes(reader.array()?);
    let partition_id = u16::from_le_bytes(reader.array()?);
    let [record_type] = reader.array()?;
    let [value_type] = reader.array()?;
    let [intent] = reader.array()?;
    let [rejection_type] = reader.array()?;
    let request_id = i64::from_le_bytes(reader.array()?);
    let [distributed] = reader.array()?;

    let record_type =
        RecordType::from_code(record_type).ok_or(CodecError::UnknownRecordType(record_type))?;
    let value_type =
        ValueType::from_code(value_type).ok_or(CodecError::UnknownValueType(value_type))?;
    let rejection_type = match rejection_type {
        0 => None,
        code => Some(RejectionType::from_code(code).ok_or(CodecError::UnknownRejectionType(code))?),
    };

    let tenant_id = reader.string("tenant")?;
    let rejection_reason = reader.string("rejection reason")?;
    let authorization: AuthorizationContext = serde_json::from_slice(reader.section()?)
        .map_err(|source| CodecError::Json {
            section: "authorization",
            source,
        })?;
    let json: serde_json::Value =
        serde_json::from_slice(reader.section()?).map_err(|source| CodecError::Json {
            section: "value",
            source,
        })?;
    let value = RecordValue::from_json(value_type, json).map_err(|source| CodecError::Json {
        section: "value",
        source,
    })?;

    Ok(Record {
        position,
        source_record_position,
        key,
        timestamp,
        partition_id,
        record_type,
        value_type,
        intent: Intent::from_code(value_type, intent),
        tenant_id,
        rejection_type,
        rejection_reason,
        authorization,
        request_id,
        distributed: distributed != 0,
        value,
    })
}

/// Size of the encoded record without allocating the encoding twice.
pub fn encoded_len(record: &Record) -> Result<usize, CodecError> {
    encode(record).map(|bytes| bytes.len())
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            None => Err(CodecError::Truncated {
                offset: self.offset,
                needed: len,
            }),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn section(&mut self) -> Result<&'a [u8], CodecError> {
        let len = u32::from_le_bytes(self.array()?) as usize;
        self.take(len)
    }

    fn string(&mut self, what: &'static str) -> Result<String, CodecError> {
        let bytes = self.section()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::Utf8(what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::record::{JobIntent, JobRecord, ProcessInstanceIntent, ProcessInstanceRecord};
    use proptest::prelude::*;

    fn sample() -> Record {
        let mut record = Record::event(
            (1 << 51) + 5,
            ProcessInstanceIntent::ElementActivated,
            ProcessInstanceRecord {
                bpmn_process_id: "order".to_string(),
                element_id: "task".to_string(),
                tenant_id: "foo".to_string(),
                ..Default::default()
            },
        );
        record.position = 3;
        record.timestamp = 1_700_000_000_000;
        record.partition_id = 1;
        record.authorization.principal = Principal::User("demo".to_string());
        record
    }

    #[test]
    fn decodes_what_it_encodes() {
        let record = sample();
        let decoded = decode(&encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn unknown_intent_is_not_an_error() {
        let mut bytes = encode(&sample()).unwrap();
        // intent byte sits right after record type and value type
        let intent_offset = 4 + 2 + 8 * 4 + 2 + 2;
        bytes[intent_offset] = 250;
        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            decoded.intent,
            Intent::Unknown {
                value_type: ValueType::ProcessInstance,
                code: 250
            }
        );
    }

    #[test]
    fn unknown_value_type_is_an_error() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[4 + 2 + 8 * 4 + 2 + 1] = 99;
        assert!(matches!(decode(&bytes), Err(CodecError::UnknownValueType(99))));
    }

    #[test]
    fn truncated_input_is_reported() {
        let bytes = encode(&sample()).unwrap();
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(decode(&bytes), Err(CodecError::BadMagic(_))));
    }

    proptest! {
        #[test]
        fn job_commands_survive_the_codec(
            job_type in "[a-z]{1,12}",
            retries in -5i32..10,
            key in 1i64..1_000_000,
            tenant in "[a-z]{1,8}",
            worker in "[a-z0-9-]{0,10}",
        ) {
            let record = Record::command(
                JobIntent::Fail,
                JobRecord { job_type, retries, worker, tenant_id: tenant, ..Default::default() },
            )
            .with_key(key);
            let decoded = decode(&encode(&record).unwrap()).unwrap();
            prop_assert_eq!(decoded, record);
        }
    }
}
