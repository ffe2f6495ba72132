/// 分類オラクル応答のJSON Schema定義。
///
/// オラクルが返す分類配列の各要素をデコード前に検証します。
/// 要素単位で検証するのは、1件の不正な分類がバッチ全体を
/// 巻き添えにしないためです。
use std::sync::LazyLock;

use jsonschema::Validator;
use serde_json::{Value, json};

/// 分類オラクル応答の1要素のスキーマ。
pub(crate) static CLASSIFICATION_ITEM_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://cinescout.dev/schemas/oracle/classification-item.json",
        "title": "Classification Oracle Item",
        "description": "One per-candidate classification entry, in input order",
        "type": "object",
        "properties": {
            "is_old_movie": {
                "type": "boolean",
                "description": "Whether the candidate is an old/classic feature film"
            },
            "estimated_era": {
                "type": "string",
                "description": "Decade label such as \"1920s\", or \"modern\""
            },
            "genre": {
                "type": "string",
                "description": "Primary genre label"
            },
            "relevance_score": {
                "type": "integer",
                "minimum": 1,
                "maximum": 10,
                "description": "Relevance to a classic-film search, 1-10"
            }
        },
        "required": ["is_old_movie", "estimated_era", "genre", "relevance_score"]
    })
});

/// コンパイル済みバリデータ。
static CLASSIFICATION_ITEM_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    jsonschema::validator_for(&CLASSIFICATION_ITEM_SCHEMA)
        .expect("classification item schema is valid")
});

/// 分類応答の1要素がスキーマに適合するかを検証する。
pub(crate) fn validate_classification_item(value: &Value) -> bool {
    CLASSIFICATION_ITEM_VALIDATOR.is_valid(value)
}
