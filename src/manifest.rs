//! Reader-index manifest: series fields plus a chapter map keyed by
//! zero-padded sequence numbers ("001", "002", ...).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub artist: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cover: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, with = "sequence_keys")]
    pub chapters: BTreeMap<u32, ChapterEntry>,
    /// Unknown top-level fields, kept as found.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChapterEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub volume: String,
    /// Unix seconds, as a string.
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_updated: String,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupLinks>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Links published by one group for a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupLinks {
    Images(Vec<String>),
    Album(String),
}

impl Manifest {
    /// Chapter titles in sequence-key order.
    pub fn chapter_titles(&self) -> Vec<&str> {
        self.chapters.values().map(|c| c.title.as_str()).collect()
    }
}

/// Format a sequence number the way the chapter map stores it.
pub fn format_key(key: u32) -> String {
    format!("{:03}", key)
}

/// Accept strings, numbers, booleans and null where a string is expected;
/// older manifests were not strict about it.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

mod sequence_keys {
    use super::{format_key, ChapterEntry};
    use serde::de::Error;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(chapters: &BTreeMap<u32, ChapterEntry>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(chapters.len()))?;
        for (key, entry) in chapters {
            map.serialize_entry(&format_key(*key), entry)?;
        }
        map.end()
    }

    /// Numeric keys keep their value; anything else ("1a", a key that
    /// collides with another after parsing) is placed after the highest one.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<u32, ChapterEntry>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<BTreeMap<String, ChapterEntry>> = Option::deserialize(deserializer)?;
        let mut chapters = BTreeMap::new();
        let mut leftovers = Vec::new();

        for (key, entry) in raw.unwrap_or_default() {
            match key.trim().parse::<u32>() {
                Ok(index) if !chapters.contains_key(&index) => {
                    chapters.insert(index, entry);
                }
                _ => leftovers.push(entry),
            }
        }

        if leftovers.is_empty() {
            return Ok(chapters);
        }

        let mut next = match chapters.keys().next_back() {
            Some(max) => max.checked_add(1),
            None => Some(0),
        };
        for entry in leftovers {
            let key = next.ok_or_else(|| D::Error::custom("no sequence key left after the highest chapter key"))?;
            chapters.insert(key, entry);
            next = key.checked_add(1);
        }
        Ok(chapters)
    }
}
