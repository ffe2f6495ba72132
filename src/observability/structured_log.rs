/// 構造化JSON形式ログ。
use serde_json::json;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// 重要イベント（INFO以上）をJSON行として標準エラーへ流すレイヤー。
#[allow(dead_code)]
pub(crate) struct StructuredLogLayer;

impl<S: Subscriber> Layer<S> for StructuredLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        use tracing::field::Visit;

        struct JsonVisitor {
            message: Option<String>,
            values: serde_json::Map<String, serde_json::Value>,
        }

        impl JsonVisitor {
            fn insert(&mut self, field: &tracing::field::Field, value: serde_json::Value) {
                if field.name() == "message" {
                    self.message = Some(match &value {
                        serde_json::Value::String(text) => text.clone(),
                        other => other.to_string(),
                    });
                } else {
                    self.values.insert(field.name().to_string(), value);
                }
            }
        }

        impl Visit for JsonVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                self.insert(field, json!(format!("{:?}", value)));
            }

            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                self.insert(field, json!(value));
            }

            fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
                self.insert(field, json!(value));
            }

            fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
                self.insert(field, json!(value));
            }

            fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
                self.insert(field, json!(value));
            }
        }

        // 重要イベントのみJSON形式で出力
        if !matches!(
            event.metadata().level(),
            &tracing::Level::ERROR | &tracing::Level::WARN | &tracing::Level::INFO
        ) {
            return;
        }

        let mut visitor = JsonVisitor {
            message: None,
            values: serde_json::Map::new(),
        };
        event.record(&mut visitor);

        let log_entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "level": event.metadata().level().as_str(),
            "service": "cinescout-worker",
            "target": event.metadata().target(),
            "message": visitor.message.unwrap_or_else(|| event.metadata().name().to_string()),
            "fields": visitor.values,
        });

        eprintln!("{}", serde_json::to_string(&log_entry).unwrap_or_default());
    }
}
