use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// 分類対象の投稿1件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_category: Option<String>,
}

impl Record {
    #[must_use]
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            timestamp: None,
            prior_category: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    #[must_use]
    pub fn with_prior_category(mut self, category: impl Into<String>) -> Self {
        self.prior_category = Some(category.into());
        self
    }
}

/// オラクルが返した1件分のラベル。
///
/// `primary_category` はタクソノミーに含まれるとは限らない。`secondary_tags` も
/// 返されたオブジェクトをそのまま保持し、欠けたフィールドを補完しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelResult {
    pub primary_category: String,
    pub secondary_tags: Value,
}

/// 識別子 → ラベル。
pub type LabelMap = HashMap<String, LabelResult>;

/// セカンダリタグを列に格納する文字列へ変換する。
///
/// オブジェクトと配列はキー順を固定したコンパクトな JSON、文字列はそのまま、
/// その他のスカラーは JSON 表記、`null` は未設定（空文字）になる。
#[must_use]
pub fn encode_secondary_tags(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(&Canonical(value)).unwrap_or_default()
        }
        scalar => scalar.to_string(),
    }
}

/// [`encode_secondary_tags`] で格納した文字列を値に戻す。
///
/// JSON として読めない文字列は文字列値として扱う。
#[must_use]
pub fn decode_secondary_tags(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Canonical<'_>> =
                    map.iter().map(|(key, value)| (key, Canonical(value))).collect();
                sorted.serialize(serializer)
            }
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            scalar => scalar.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_object_sorts_keys_and_is_compact() {
        let tags = json!({
            "sentiment": "Negative",
            "intensity": "High",
            "timing": "Unknown"
        });

        assert_eq!(
            encode_secondary_tags(&tags),
            r#"{"intensity":"High","sentiment":"Negative","timing":"Unknown"}"#
        );
    }

    #[test]
    fn encode_scalars_as_plain_strings() {
        assert_eq!(encode_secondary_tags(&json!("n/a")), "n/a");
        assert_eq!(encode_secondary_tags(&json!(3)), "3");
        assert_eq!(encode_secondary_tags(&json!(true)), "true");
        assert_eq!(encode_secondary_tags(&Value::Null), "");
    }

    #[test]
    fn encoded_tags_round_trip() {
        let tags = json!({
            "timing": "InTradingWindow",
            "targets_entity": "True",
            "sentiment": "Mixed",
            "has_action_keywords": "False",
            "intensity": "Medium",
            "nested": {"b": [1, 2], "a": null}
        });

        let encoded = encode_secondary_tags(&tags);
        assert_eq!(decode_secondary_tags(&encoded), tags);
    }

    #[test]
    fn decode_keeps_non_json_text() {
        assert_eq!(decode_secondary_tags("n/a"), json!("n/a"));
        assert_eq!(decode_secondary_tags(""), Value::Null);
    }
}
