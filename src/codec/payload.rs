use ciborium::Value;
use ciborium::value::Integer;
use thiserror::Error;

/// Errors returned by the structured-payload codec.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum PayloadError {
    #[error("failed to encode structured payload: {reason}")]
    Encode { reason: String },
    #[error("failed to decode structured payload: {reason}")]
    Decode { reason: String },
}

/// Ordered string-keyed map used to build request payloads.
///
/// ```
/// use newtmgr::PayloadMap;
///
/// let payload = PayloadMap::new().text("d", "hello").encode()?;
/// assert_eq!(vec![0xA1, 0x61, 0x64, 0x65, b'h', b'e', b'l', b'l', b'o'], payload);
/// # Ok::<(), newtmgr::PayloadError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadMap {
    entries: Vec<(String, Value)>,
}

impl PayloadMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a raw value, replacing an earlier entry with the same key in place.
    #[must_use]
    pub fn value(mut self, key: &str, value: Value) -> Self {
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_owned(), value)),
        }
        self
    }

    #[must_use]
    pub fn uint(self, key: &str, value: u64) -> Self {
        self.value(key, Value::Integer(Integer::from(value)))
    }

    #[must_use]
    pub fn text(self, key: &str, value: impl Into<String>) -> Self {
        self.value(key, Value::Text(value.into()))
    }

    #[must_use]
    pub fn boolean(self, key: &str, value: bool) -> Self {
        self.value(key, Value::Bool(value))
    }

    #[must_use]
    pub fn bytes(self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.value(key, Value::Bytes(value.into()))
    }

    /// Inserts an explicit null.
    #[must_use]
    pub fn null(self, key: &str) -> Self {
        self.value(key, Value::Null)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Map(
            self.entries
                .into_iter()
                .map(|(key, value)| (Value::Text(key), value))
                .collect(),
        )
    }

    /// Encodes the map as one structured-payload item.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying encoder fails.
    pub fn encode(self) -> Result<Vec<u8>, PayloadError> {
        encode_payload(&self.into_value())
    }
}

/// Encodes one structured value.
///
/// # Errors
///
/// Returns an error when the underlying encoder fails.
pub fn encode_payload(value: &Value) -> Result<Vec<u8>, PayloadError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|error| PayloadError::Encode {
        reason: format!("{error:?}"),
    })?;
    Ok(bytes)
}

/// Decodes one structured value from reassembled payload bytes.
///
/// An empty buffer decodes as an empty map: devices answer some writes with
/// no payload at all.
///
/// # Errors
///
/// Returns an error when the bytes are not a well-formed item.
pub fn decode_payload(bytes: &[u8]) -> Result<Value, PayloadError> {
    if bytes.is_empty() {
        return Ok(Value::Map(Vec::new()));
    }

    ciborium::from_reader::<Value, _>(bytes).map_err(|error| PayloadError::Decode {
        reason: format!("{error:?}"),
    })
}

/// Permissive, read-only view over a decoded payload.
///
/// Lookups never fail: a missing key or a value of the wrong type reads as
/// zero, empty or `false`.
#[derive(Debug, Clone, Copy)]
pub struct PayloadView<'a> {
    value: Option<&'a Value>,
}

impl<'a> PayloadView<'a> {
    #[must_use]
    pub fn new(value: &'a Value) -> Self {
        Self {
            value: Some(untagged(value)),
        }
    }

    fn missing() -> Self {
        Self { value: None }
    }

    /// Returns the raw value under `key`, if the view is a map holding it.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        let Some(Value::Map(entries)) = self.value else {
            return None;
        };
        entries
            .iter()
            .find(|(candidate, _)| matches!(untagged(candidate), Value::Text(text) if text == key))
            .map(|(_, value)| untagged(value))
    }

    /// Returns a view of the value under `key`.
    #[must_use]
    pub fn field(&self, key: &str) -> PayloadView<'a> {
        self.get(key).map_or_else(Self::missing, Self::new)
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    #[must_use]
    pub fn as_uint(&self) -> u64 {
        match self.value {
            Some(Value::Integer(integer)) => u64::try_from(*integer).unwrap_or(0),
            _ => 0,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> i64 {
        match self.value {
            Some(Value::Integer(integer)) => i64::try_from(*integer).unwrap_or(0),
            _ => 0,
        }
    }

    /// Returns the integer value, or `None` when this is not an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i128> {
        match self.value {
            Some(Value::Integer(integer)) => Some(i128::from(*integer)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> String {
        match self.value {
            Some(Value::Text(text)) => text.clone(),
            _ => String::new(),
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> bool {
        matches!(self.value, Some(Value::Bool(true)))
    }

    #[must_use]
    pub fn as_bytes(&self) -> Vec<u8> {
        match self.value {
            Some(Value::Bytes(bytes)) => bytes.clone(),
            _ => Vec::new(),
        }
    }

    /// Returns views over array elements; non-arrays read as empty.
    #[must_use]
    pub fn elements(&self) -> Vec<PayloadView<'a>> {
        match self.value {
            Some(Value::Array(values)) => values.iter().map(PayloadView::new).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns map entries in wire order; non-text keys read as empty names.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, PayloadView<'a>)> {
        match self.value {
            Some(Value::Map(entries)) => entries
                .iter()
                .map(|(key, value)| (PayloadView::new(key).as_text(), PayloadView::new(value)))
                .collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn uint(&self, key: &str) -> u64 {
        self.field(key).as_uint()
    }

    #[must_use]
    pub fn text(&self, key: &str) -> String {
        self.field(key).as_text()
    }

    #[must_use]
    pub fn boolean(&self, key: &str) -> bool {
        self.field(key).as_bool()
    }

    #[must_use]
    pub fn bytes(&self, key: &str) -> Vec<u8> {
        self.field(key).as_bytes()
    }
}

fn untagged(value: &Value) -> &Value {
    match value {
        Value::Tag(_, inner) => untagged(inner),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn sample() -> Value {
        PayloadMap::new()
            .uint("off", 146)
            .text("version", "1.2.3")
            .boolean("active", true)
            .bytes("hash", vec![0xDE, 0xAD])
            .null("missing")
            .value(
                "images",
                Value::Array(vec![PayloadMap::new().uint("slot", 1).into_value()]),
            )
            .into_value()
    }

    #[test]
    fn map_keeps_insertion_order_and_replaces_in_place() {
        let map = PayloadMap::new()
            .boolean("confirm", false)
            .bytes("hash", vec![0x01])
            .boolean("confirm", true);
        assert_eq!(2, map.len());

        let value = map.into_value();
        let view = PayloadView::new(&value);
        let keys: Vec<String> = view.entries().into_iter().map(|(key, _)| key).collect();
        assert_eq!(vec!["confirm".to_string(), "hash".to_string()], keys);
        assert!(view.boolean("confirm"));
    }

    #[test]
    fn decode_reads_back_encoded_fields() {
        let bytes = encode_payload(&sample()).expect("sample payload should encode");
        let value = decode_payload(&bytes).expect("encoded payload should decode");
        let view = PayloadView::new(&value);

        assert_eq!(146, view.uint("off"));
        assert_eq!("1.2.3", view.text("version"));
        assert!(view.boolean("active"));
        assert_eq!(vec![0xDE, 0xAD], view.bytes("hash"));
        assert_eq!(1, view.field("images").elements()[0].uint("slot"));
    }

    #[rstest]
    #[case("absent")]
    #[case("version")]
    #[case("missing")]
    fn wrong_or_missing_fields_read_as_neutral_defaults(#[case] key: &str) {
        let value = sample();
        let view = PayloadView::new(&value);

        assert_eq!(0, view.uint(key));
        assert!(!view.boolean(key));
        assert!(view.bytes(key).is_empty());
        assert!(view.field(key).elements().is_empty());
        assert!(view.field(key).entries().is_empty());
    }

    #[test]
    fn negative_integers_do_not_read_as_unsigned() {
        let value = PayloadMap::new()
            .value("rc", Value::Integer(Integer::from(-1i64)))
            .into_value();
        let view = PayloadView::new(&value);
        assert_eq!(0, view.uint("rc"));
        assert_eq!(-1, view.field("rc").as_int());
        assert_eq!(Some(-1), view.field("rc").as_integer());
    }

    #[test]
    fn empty_buffer_decodes_as_empty_map() {
        let value = decode_payload(&[]).expect("empty payload is accepted");
        assert_eq!(Value::Map(Vec::new()), value);
    }

    #[test]
    fn truncated_item_fails_to_decode() {
        // Map header announcing one pair, followed by nothing.
        assert_matches!(decode_payload(&[0xA1]), Err(PayloadError::Decode { .. }));
    }

    #[test]
    fn tagged_values_read_through_the_tag() {
        let value = Value::Map(vec![(
            Value::Text("off".into()),
            Value::Tag(24, Box::new(Value::Integer(Integer::from(9u64)))),
        )]);
        assert_eq!(9, PayloadView::new(&value).uint("off"));
    }
}
