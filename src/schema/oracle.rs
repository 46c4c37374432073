//! オラクル応答のJSON Schema定義。
//!
//! 形だけを検証する。カテゴリ名やタグ値がタクソノミーに含まれるかは見ない。

use once_cell::sync::Lazy;
use serde_json::{Value, json};

/// ラベル応答（配列）のJSON Schema。
pub(crate) static LABEL_REPLY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://alt.dev/schemas/post-labeler/label-reply.json",
        "title": "Post Label Reply",
        "description": "Labels returned by the classification oracle for one batch",
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "id": {
                    "type": ["string", "integer"],
                    "description": "Identifier echoed from the request"
                },
                "primary_category": {
                    "type": "string",
                    "description": "Category name from the taxonomy (not enforced)"
                },
                "secondary_tags": {
                    "type": "object",
                    "description": "Secondary tag object, stored verbatim"
                }
            },
            "required": ["id", "primary_category", "secondary_tags"]
        }
    })
});
