//! Wire record parsing and formatting.
//!
//! AMI frames messages as blocks of `Name: Value` lines terminated by a
//! blank line. A parsed block becomes a [`Record`]: an ordered field list
//! where lookups resolve to the last occurrence of a repeated name.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One parsed protocol record: an ordered list of field name/value pairs.
///
/// Field names are not unique on the wire; [`Record::get`] returns the last
/// occurrence. A record is immutable once it leaves the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Value of `name`, last occurrence winning.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `Event` field, when present.
    pub fn event_name(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in wire order, repeated names included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Decode one raw line. The server may emit a legacy 8-bit encoding, so
/// undecodable byte sequences are replaced rather than failing the block.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Parse one block of decoded lines into a [`Record`].
///
/// Each line splits on the first `": "`. Lines without the separator (the
/// connect greeting, banner noise) are skipped, not fatal.
pub(crate) fn parse_block<S: AsRef<str>>(lines: &[S]) -> Record {
    let mut record = Record::new();
    for line in lines {
        let line = line.as_ref();
        match line.split_once(": ") {
            Some((name, value)) => record.push(name.trim(), value.trim()),
            None => log::debug!("skipping line without field separator: {line:?}"),
        }
    }
    record
}

/// Format an ordered field mapping as a wire block.
///
/// Repeated logical fields arrive keyed as `Name[0]`, `Name[1]`, …; the
/// index suffix is an API-side convention only and is stripped here, since
/// the wire format has no array syntax.
pub(crate) fn format_fields<I, K, V>(fields: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut block = String::new();
    for (name, value) in fields {
        block.push_str(strip_index_suffix(name.as_ref()));
        block.push_str(": ");
        block.push_str(value.as_ref());
        block.push_str("\r\n");
    }
    block.push_str("\r\n");
    block
}

/// Strip one trailing `[<digits>]` suffix from a field name.
fn strip_index_suffix(name: &str) -> &str {
    let Some(rest) = name.strip_suffix(']') else {
        return name;
    };
    match rest.rfind('[') {
        Some(open) if open > 0 && rest[open + 1..].chars().all(|c| c.is_ascii_digit()) => {
            &name[..open]
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_basic() {
        let lines = ["Response: Success", "ActionID: 123", "Message: Authentication accepted"];
        let record = parse_block(&lines);
        assert_eq!(record.get("Response"), Some("Success"));
        assert_eq!(record.get("ActionID"), Some("123"));
        assert_eq!(record.get("Message"), Some("Authentication accepted"));
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn test_parse_block_last_occurrence_wins() {
        let lines = ["Variable: a=1", "Variable: b=2"];
        let record = parse_block(&lines);
        assert_eq!(record.get("Variable"), Some("b=2"));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_parse_block_skips_malformed_lines() {
        let lines = [
            "Asterisk Call Manager/5.0.1",
            "Response: Success",
            "no-separator-here",
        ];
        let record = parse_block(&lines);
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("Response"), Some("Success"));
    }

    #[test]
    fn test_parse_block_only_first_separator_splits() {
        let lines = ["Message: Originate: queued"];
        let record = parse_block(&lines);
        assert_eq!(record.get("Message"), Some("Originate: queued"));
    }

    #[test]
    fn test_decode_line_replaces_invalid_bytes() {
        let raw = b"CallerIDName: \xcf\xf0\xe8\xe2\xe5\xf2\r\n";
        let line = decode_line(raw);
        assert!(line.starts_with("CallerIDName: "));
        assert!(line.contains('\u{FFFD}'));
        assert!(!line.ends_with('\n'));
    }

    #[test]
    fn test_format_fields_block_shape() {
        let block = format_fields([("Action", "Ping")]);
        assert_eq!(block, "Action: Ping\r\n\r\n");
    }

    #[test]
    fn test_format_fields_strips_index_suffix() {
        let block = format_fields([
            ("Action", "Originate"),
            ("Codecs[0]", "alaw"),
            ("Codecs[1]", "ulaw"),
        ]);
        assert_eq!(
            block,
            "Action: Originate\r\nCodecs: alaw\r\nCodecs: ulaw\r\n\r\n"
        );
    }

    #[test]
    fn test_strip_index_suffix_edge_cases() {
        assert_eq!(strip_index_suffix("Variable[10]"), "Variable");
        assert_eq!(strip_index_suffix("Variable"), "Variable");
        assert_eq!(strip_index_suffix("Variable[]"), "Variable[]");
        assert_eq!(strip_index_suffix("Variable[x]"), "Variable[x]");
        assert_eq!(strip_index_suffix("[0]"), "[0]");
    }

    #[test]
    fn test_round_trip() {
        let fields = vec![
            ("Action".to_string(), "Originate".to_string()),
            ("Channel".to_string(), "Local/100@from-internal".to_string()),
            ("Variable[0]".to_string(), "A=1".to_string()),
            ("Variable[1]".to_string(), "B=2".to_string()),
        ];
        let block = format_fields(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let lines: Vec<&str> = block.split("\r\n").filter(|l| !l.is_empty()).collect();
        let record = parse_block(&lines);

        assert_eq!(record.get("Action"), Some("Originate"));
        assert_eq!(record.get("Channel"), Some("Local/100@from-internal"));
        // Index suffixes collapse to the bare name; both values survive in order.
        let variables: Vec<&str> = record
            .iter()
            .filter(|(k, _)| *k == "Variable")
            .map(|(_, v)| v)
            .collect();
        assert_eq!(variables, ["A=1", "B=2"]);
    }

    #[test]
    fn test_record_serializes_in_field_order() {
        let record: Record = [("Event", "Newchannel"), ("Channel", "SIP/100-1")]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"Event":"Newchannel","Channel":"SIP/100-1"}"#);
    }
}
