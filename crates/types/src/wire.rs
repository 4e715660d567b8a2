//! Serde adapters for the JSON wire format.
//!
//! Hashes and signatures travel as base64 strings; tree sizes and revisions
//! as decimal strings so 64-bit values survive JSON implementations that
//! round large numbers.

/// `Vec<u8>` as a base64 string.
pub mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// `Vec<Vec<u8>>` as an array of base64 strings.
pub mod b64_list {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(list: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = list.iter().map(|bytes| STANDARD.encode(bytes)).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|entry| {
                STANDARD
                    .decode(entry.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

/// `u64` as a decimal string.
pub mod u64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>().map_err(serde::de::Error::custom)
    }
}

/// `Option<u64>` as an optional decimal string.
pub mod opt_u64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&value.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|raw| raw.parse::<u64>().map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "super::b64")]
        hash: Vec<u8>,
        #[serde(with = "super::u64_string")]
        size: u64,
        #[serde(with = "super::opt_u64_string")]
        old_size: Option<u64>,
    }

    #[test]
    fn test_wire_roundtrip() {
        let sample = Sample {
            hash: vec![0, 1, 254, 255],
            size: u64::MAX,
            old_size: Some(42),
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"18446744073709551615\""));
        let back: Sample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_missing_optional_revision() {
        let back: Sample =
            serde_json::from_str(r#"{"hash":"AA==","size":"1","old_size":null}"#).unwrap();
        assert_eq!(back.old_size, None);
    }
}
