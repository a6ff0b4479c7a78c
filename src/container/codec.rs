//! Frame payload codec: a length-prefixed key followed by one Arrow IPC stream.

use std::sync::Arc;

use arrow::{
    compute::concat_batches,
    datatypes::SchemaRef,
    ipc::{convert::fb_to_schema, reader::StreamReader, root_as_message, writer::StreamWriter},
    record_batch::RecordBatch,
};

use crate::error::{SweepError, SweepResult};

const KEY_LEN_SIZE: usize = 4;

/// Encode `batch` under `key` into a frame payload.
pub(crate) fn encode_payload(key: &str, batch: &RecordBatch) -> SweepResult<Vec<u8>> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| SweepError::Schema(format!("key of {} bytes is too long", key.len())))?;

    let mut buf = Vec::with_capacity(KEY_LEN_SIZE + key.len() + batch.get_array_memory_size());
    buf.extend_from_slice(&key_len.to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    {
        let mut writer = StreamWriter::try_new(&mut buf, &batch.schema())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    Ok(buf)
}

const CONTINUATION_MARKER: u32 = 0xFFFF_FFFF;

/// Key, schema and row count of a frame payload, without its column data.
#[derive(Debug, Clone)]
pub(crate) struct PayloadSummary {
    pub(crate) key: String,
    pub(crate) schema: SchemaRef,
    pub(crate) num_rows: usize,
}

fn split_key(payload: &[u8]) -> SweepResult<(String, &[u8])> {
    if payload.len() < KEY_LEN_SIZE {
        return Err(SweepError::Corrupt("payload shorter than key prefix".into()));
    }
    let (len_bytes, rest) = payload.split_at(KEY_LEN_SIZE);
    let key_len = read_u32(len_bytes) as usize;
    if rest.len() < key_len {
        return Err(SweepError::Corrupt("payload key truncated".into()));
    }
    let (key_bytes, ipc) = rest.split_at(key_len);
    let key = std::str::from_utf8(key_bytes)
        .map_err(|err| SweepError::Corrupt(format!("payload key is not utf-8: {err}")))?
        .to_string();
    Ok((key, ipc))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

/// Decode a frame payload back into its key and rows.
pub(crate) fn decode_payload(payload: &[u8]) -> SweepResult<(String, RecordBatch)> {
    let (key, ipc) = split_key(payload)?;
    let reader = StreamReader::try_new(ipc, None)?;
    let schema = reader.schema();
    let mut batches = reader.collect::<Result<Vec<_>, _>>()?;
    let batch = match batches.len() {
        0 => RecordBatch::new_empty(schema),
        1 => batches.remove(0),
        _ => concat_batches(&schema, &batches)?,
    };
    Ok((key, batch))
}

/// Read a payload's key, schema and row count from the IPC message headers.
///
/// Message bodies are skipped, so the cost does not depend on how many
/// values the frame holds.
pub(crate) fn summarize_payload(payload: &[u8]) -> SweepResult<PayloadSummary> {
    let (key, mut ipc) = split_key(payload)?;
    let corrupt = |what: &str| SweepError::Corrupt(format!("frame `{key}`: {what}"));

    let mut schema = None;
    let mut num_rows = 0usize;
    loop {
        if ipc.len() < 4 {
            break;
        }
        let mut meta_len = read_u32(ipc);
        ipc = &ipc[4..];
        if meta_len == CONTINUATION_MARKER {
            if ipc.len() < 4 {
                return Err(corrupt("ipc message length truncated"));
            }
            meta_len = read_u32(ipc);
            ipc = &ipc[4..];
        }
        if meta_len == 0 {
            break;
        }
        let meta_len = meta_len as usize;
        if ipc.len() < meta_len {
            return Err(corrupt("ipc message header truncated"));
        }
        let message = root_as_message(&ipc[..meta_len])
            .map_err(|err| corrupt(&format!("invalid ipc message: {err}")))?;
        let body_len = usize::try_from(message.bodyLength())
            .map_err(|_| corrupt("negative ipc body length"))?;
        if let Some(fb_schema) = message.header_as_schema() {
            schema = Some(Arc::new(fb_to_schema(fb_schema)));
        } else if let Some(batch) = message.header_as_record_batch() {
            num_rows += usize::try_from(batch.length())
                .map_err(|_| corrupt("negative ipc row count"))?;
        }
        let skip = meta_len
            .checked_add(body_len)
            .filter(|total| *total <= ipc.len())
            .ok_or_else(|| corrupt("ipc message body truncated"))?;
        ipc = &ipc[skip..];
    }

    let schema = schema.ok_or_else(|| corrupt("ipc stream has no schema"))?;
    Ok(PayloadSummary {
        key,
        schema,
        num_rows,
    })
}

#[cfg(test)]
mod tests {
    use arrow::{
        array::{Float64Array, Int64Array},
        datatypes::{DataType, Field, Schema},
    };

    use super::*;

    fn batch(rows: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("f", DataType::Int64, false),
            Field::new("mag", DataType::Float64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from_iter_values(0..rows as i64)),
                Arc::new(Float64Array::from_iter_values((0..rows).map(|r| r as f64 * 0.5))),
            ],
        )
        .expect("batch")
    }

    #[test]
    fn payload_keeps_key_and_rows() {
        let original = batch(3);
        let payload = encode_payload("sweep", &original).unwrap();
        let (key, decoded) = decode_payload(&payload).unwrap();
        assert_eq!(key, "sweep");
        assert_eq!(decoded, original);
    }

    #[test]
    fn empty_batch_keeps_schema() {
        let original = batch(0);
        let payload = encode_payload("empty", &original).unwrap();
        let (_, decoded) = decode_payload(&payload).unwrap();
        assert_eq!(decoded.num_rows(), 0);
        assert_eq!(decoded.schema(), original.schema());
    }

    #[test]
    fn summary_matches_decoded_payload() {
        for rows in [0, 1, 17] {
            let original = batch(rows);
            let payload = encode_payload("sweep", &original).unwrap();
            let summary = summarize_payload(&payload).unwrap();
            assert_eq!(summary.key, "sweep");
            assert_eq!(summary.num_rows, rows);
            assert_eq!(summary.schema, original.schema());
        }
    }

    #[test]
    fn summary_keeps_schema_metadata() {
        let schema = Arc::new(
            Schema::new(vec![Field::new("mag", DataType::Float64, false)]).with_metadata(
                [("sweepstore.index_columns".to_string(), "0".to_string())].into(),
            ),
        );
        let original = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Float64Array::from(vec![1.0, 2.0]))],
        )
        .unwrap();
        let payload = encode_payload("t", &original).unwrap();
        let summary = summarize_payload(&payload).unwrap();
        assert_eq!(summary.schema, schema);
        assert_eq!(summary.num_rows, 2);
    }

    #[test]
    fn summary_rejects_cut_stream() {
        let payload = encode_payload("sweep", &batch(4)).unwrap();
        let err = summarize_payload(&payload[..payload.len() - 20]).expect_err("cut body");
        assert!(matches!(err, SweepError::Corrupt(_)));
    }

    #[test]
    fn truncated_key_is_corrupt() {
        let payload = encode_payload("settings", &batch(1)).unwrap();
        let err = decode_payload(&payload[..6]).expect_err("truncated key");
        assert!(matches!(err, SweepError::Corrupt(msg) if msg.contains("key truncated")));
    }
}
