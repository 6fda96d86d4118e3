//! Source adapters
//!
//! Pure translation from a platform payload into normalized records. No I/O
//! and no state: an adapter sees one endpoint response at a time.
//!
//! Each platform implements [`SourceAdapter`]; the free functions
//! [`adapt_vms`], [`adapt_hosts`] and [`adapt_networks`] unwrap the response
//! envelope, normalize every record and collect the ones that could not be
//! normalized.

pub mod nutanix;
pub mod vmware;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{DiskRecord, HostRecord, NetworkRecord, NicRecord, Platform, VmFactValues};

pub use nutanix::NutanixAdapter;
pub use vmware::VmwareAdapter;

/// Platform-agnostic VM produced by an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVm {
    /// Platform VM UUID
    pub vm_uuid: String,
    /// Display name, when reported
    pub name: Option<String>,
    /// Firmware UUID, when reported
    pub bios_uuid: Option<String>,
    pub facts: VmFactValues,
    pub nics: Vec<NicRecord>,
    pub disks: Vec<DiskRecord>,
    /// The source record as received
    pub raw: Value,
}

/// Result of adapting one endpoint response
#[derive(Debug, Clone, PartialEq)]
pub struct Adapted<T> {
    /// Records that normalized cleanly, in payload order
    pub records: Vec<T>,
    /// One description per record that was skipped
    pub skipped: Vec<String>,
}

impl<T> Default for Adapted<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Per-platform payload translation
pub trait SourceAdapter: Send + Sync {
    /// Platform this adapter understands
    fn platform(&self) -> Platform;

    /// Unwrap the VM records from a response envelope
    fn vm_records<'a>(&self, payload: &'a Value) -> Vec<&'a Value>;

    /// Normalize one VM record
    fn normalize_vm(&self, record: &Value) -> Result<NormalizedVm>;

    /// Unwrap the host records from a response envelope
    fn host_records<'a>(&self, payload: &'a Value) -> Vec<&'a Value>;

    /// Normalize one host record
    fn normalize_host(&self, record: &Value) -> Result<HostRecord>;

    /// Unwrap the network records from a response envelope
    fn network_records<'a>(&self, payload: &'a Value) -> Vec<&'a Value>;

    /// Normalize one network record
    fn normalize_network(&self, record: &Value) -> Result<NetworkRecord>;
}

static VMWARE: VmwareAdapter = VmwareAdapter;
static NUTANIX: NutanixAdapter = NutanixAdapter;

/// The adapter for a platform
pub fn adapter_for(platform: Platform) -> &'static dyn SourceAdapter {
    match platform {
        Platform::Vmware => &VMWARE,
        Platform::Nutanix => &NUTANIX,
    }
}

/// Adapt a VM response
pub fn adapt_vms(platform: Platform, payload: &Value) -> Adapted<NormalizedVm> {
    let adapter = adapter_for(platform);
    collect(adapter.vm_records(payload), |r| adapter.normalize_vm(r))
}

/// Adapt a host response
pub fn adapt_hosts(platform: Platform, payload: &Value) -> Adapted<HostRecord> {
    let adapter = adapter_for(platform);
    collect(adapter.host_records(payload), |r| adapter.normalize_host(r))
}

/// Adapt a network response
pub fn adapt_networks(platform: Platform, payload: &Value) -> Adapted<NetworkRecord> {
    let adapter = adapter_for(platform);
    collect(adapter.network_records(payload), |r| adapter.normalize_network(r))
}

fn collect<T>(records: Vec<&Value>, normalize: impl Fn(&Value) -> Result<T>) -> Adapted<T> {
    let mut adapted = Adapted::default();

    for (index, record) in records.into_iter().enumerate() {
        match normalize(record) {
            Ok(normalized) => adapted.records.push(normalized),
            Err(e) => {
                let label = str_field(record, "name")
                    .map(|name| format!("record #{} ({})", index, name))
                    .unwrap_or_else(|| format!("record #{}", index));
                tracing::warn!("Skipping {}: {}", label, e);
                adapted.skipped.push(format!("{}: {}", label, e));
            }
        }
    }

    adapted
}

// Payload helpers shared by the platform adapters

/// Records of a payload that is either a bare list or an object holding
/// the list under `key`
pub(crate) fn list_or_keyed<'a>(payload: &'a Value, key: &str) -> Vec<&'a Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get(key) {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Records of a payload that is a list of objects each holding a partial
/// list under `key`, or a single such object
pub(crate) fn nested_keyed<'a>(payload: &'a Value, key: &str) -> Vec<&'a Value> {
    match payload {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get(key).and_then(Value::as_array))
            .flatten()
            .collect(),
        Value::Object(_) => list_or_keyed(payload, key),
        _ => Vec::new(),
    }
}

/// Array field of a record, empty when absent
pub(crate) fn array_field<'a>(record: &'a Value, key: &str) -> &'a [Value] {
    record
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Object field of a record, `Null` when absent
pub(crate) fn object_field<'a>(record: &'a Value, key: &str) -> &'a Value {
    record.get(key).unwrap_or(&Value::Null)
}

/// Non-empty text field; numbers are rendered as text
pub(crate) fn str_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer field; floats are truncated and numeric strings parsed
pub(crate) fn int_field(record: &Value, key: &str) -> Option<i64> {
    match record.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Float field; numeric strings parsed
pub(crate) fn float_field(record: &Value, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn bool_field(record: &Value, key: &str) -> Option<bool> {
    record.get(key).and_then(Value::as_bool)
}

/// Source timestamp: RFC 3339, or a naive ISO 8601 time taken as UTC
///
/// `"N/A"`, empty and unparseable values are `None`.
pub(crate) fn timestamp_field(record: &Value, key: &str) -> Option<DateTime<Utc>> {
    let raw = record.get(key)?.as_str()?.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("n/a") {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Required identity field
pub(crate) fn required_id(record: &Value, key: &str) -> Result<String> {
    str_field(record, key).ok_or_else(|| Error::invalid_record(format!("missing '{}'", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_accept_rfc3339_and_reject_placeholders() {
        let record = json!({
            "zulu": "2024-03-01T10:00:00Z",
            "offset": "2024-03-01T12:00:00+02:00",
            "naive": "2024-03-01T10:00:00",
            "na": "N/A",
            "empty": "",
            "junk": "yesterday"
        });

        let expected = "2024-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(timestamp_field(&record, "zulu"), Some(expected));
        assert_eq!(timestamp_field(&record, "offset"), Some(expected));
        assert_eq!(timestamp_field(&record, "naive"), Some(expected));
        assert_eq!(timestamp_field(&record, "na"), None);
        assert_eq!(timestamp_field(&record, "empty"), None);
        assert_eq!(timestamp_field(&record, "junk"), None);
        assert_eq!(timestamp_field(&record, "missing"), None);
    }

    #[test]
    fn nested_envelopes_are_flattened() {
        let payload = json!([
            {"vms": [{"uuid": "a"}, {"uuid": "b"}]},
            {"other": true},
            {"vms": [{"uuid": "c"}]}
        ]);

        let records = nested_keyed(&payload, "vms");
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["uuid"], "c");

        let single = json!({"vms": [{"uuid": "x"}]});
        assert_eq!(nested_keyed(&single, "vms").len(), 1);
    }

    #[test]
    fn unexpected_payload_shape_yields_nothing() {
        assert!(list_or_keyed(&json!("oops"), "vms").is_empty());
        assert!(list_or_keyed(&json!({"items": []}), "vms").is_empty());
    }

    #[test]
    fn records_missing_identity_are_skipped_with_a_reason() {
        let payload = json!([
            {"uuid": "vm-1", "name": "web-01"},
            {"name": "orphan"}
        ]);

        let adapted = adapt_vms(Platform::Vmware, &payload);
        assert_eq!(adapted.records.len(), 1);
        assert_eq!(adapted.skipped.len(), 1);
        assert!(adapted.skipped[0].contains("orphan"));
        assert!(adapted.skipped[0].contains("uuid"));
    }

    #[test]
    fn numeric_fields_tolerate_strings_and_floats() {
        let record = json!({"a": "4", "b": 2.0, "c": "12.5", "d": true});
        assert_eq!(int_field(&record, "a"), Some(4));
        assert_eq!(int_field(&record, "b"), Some(2));
        assert_eq!(float_field(&record, "c"), Some(12.5));
        assert_eq!(int_field(&record, "d"), None);
    }
}
