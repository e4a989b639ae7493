//! Beacon payload format.
//!
//! A beacon's payload is its send time in milliseconds since the Unix epoch,
//! written as a decimal string. The record's `probe-id` header says which
//! probe instance sent it.

use crate::broker::ReceivedRecord;
use crate::errors::BeaconError;

/// Payload for a beacon sent at `sent_at_ms`.
#[must_use]
pub fn encode_send_time(sent_at_ms: i64) -> String {
    sent_at_ms.to_string()
}

/// Send time carried by a beacon payload.
///
/// # Errors
///
/// Returns [`BeaconError`] for a missing, non UTF-8 or non-numeric payload.
pub fn decode_send_time(partition: i32, payload: Option<&[u8]>) -> Result<i64, BeaconError> {
    let payload = payload.ok_or(BeaconError::MissingPayload { partition })?;
    let text = std::str::from_utf8(payload).map_err(|_| BeaconError::NotUtf8 { partition })?;
    text.trim()
        .parse()
        .map_err(|_| BeaconError::InvalidTimestamp {
            partition,
            payload: text.to_string(),
        })
}

/// A beacon of this probe that came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTrip {
    pub partition: i32,
    pub sent_at_ms: i64,
    pub elapsed_ms: i64,
}

/// Turn a received record into a round trip measured at `now_ms`.
///
/// Returns `Ok(None)` for records without a `probe-id` header or tagged by a
/// different probe; those are not ours to measure.
///
/// # Errors
///
/// Returns [`BeaconError`] when the record is ours but its payload is not a
/// send time.
pub fn measure(
    record: &ReceivedRecord,
    probe_id: &str,
    now_ms: i64,
) -> Result<Option<RoundTrip>, BeaconError> {
    if record.probe_id.as_deref() != Some(probe_id) {
        return Ok(None);
    }

    let sent_at_ms = decode_send_time(record.partition, record.payload.as_deref())?;
    Ok(Some(RoundTrip {
        partition: record.partition,
        sent_at_ms,
        elapsed_ms: now_ms.saturating_sub(sent_at_ms),
    }))
}
