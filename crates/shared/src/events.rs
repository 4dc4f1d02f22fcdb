//! 总线事件模型
//!
//! 定义订单编排涉及的三个 topic 的消息结构。字段名即线上 JSON 键名
//! （snake_case），与支付/库存服务的既有契约保持一致。
//! 金额在线上用 f64 表示（与 gRPC 契约的 double 一致），服务内部
//! 的精确十进制运算在领域层完成，不在信封中体现。

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PaymentStatus — 支付状态
// ---------------------------------------------------------------------------

/// 支付服务发布的支付状态
///
/// `Unknown` 兜底变体吸收未来新增的状态值：反序列化不会失败，
/// 消费侧将其视为"无需状态迁移"的空操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// PaymentStatusUpdate — payment-status-updates 消息
// ---------------------------------------------------------------------------

/// `payment-status-updates` topic 的消息体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusUpdate {
    pub payment_id: String,
    pub order_id: String,
    pub status: PaymentStatus,
}

// ---------------------------------------------------------------------------
// StockEvent — stock-events 消息
// ---------------------------------------------------------------------------

/// 库存服务发布的预占结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockEventStatus {
    Reserved,
    Failed,
    #[serde(other)]
    Unknown,
}

/// `stock-events` topic 的消息体
///
/// 库存服务在同一 topic 上还会发布与具体订单无关的库存同步事件，
/// 这些消息没有 order_id；缺省为空字符串，消费侧据此跳过。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockEvent {
    #[serde(default)]
    pub order_id: String,
    pub status: StockEventStatus,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// OrderEvent — order-events 消息
// ---------------------------------------------------------------------------

/// 订单事件中的行项目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEventItem {
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: f64,
}

/// 订单创建成功后发布到 `order-events` 的消息体
///
/// 以订单 ID 作为分区键发布，保证同一订单的事件落在同一分区、
/// 按序消费。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub payment_id: String,
    pub user_id: String,
    pub amount: f64,
    pub items: Vec<OrderEventItem>,
    pub address: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_update_deserialize() {
        let json = r#"{"payment_id":"pay-1","order_id":"ord-1","status":"PAID"}"#;
        let update: PaymentStatusUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.payment_id, "pay-1");
        assert_eq!(update.order_id, "ord-1");
        assert_eq!(update.status, PaymentStatus::Paid);
    }

    #[test]
    fn test_payment_status_unknown_value_does_not_fail() {
        let json = r#"{"payment_id":"pay-1","order_id":"ord-1","status":"REFUNDED"}"#;
        let update: PaymentStatusUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.status, PaymentStatus::Unknown);
    }

    #[test]
    fn test_stock_event_deserialize() {
        let json = r#"{"order_id":"ord-2","status":"failed","message":"库存不足"}"#;
        let event: StockEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.order_id, "ord-2");
        assert_eq!(event.status, StockEventStatus::Failed);
        assert_eq!(event.message, "库存不足");
    }

    #[test]
    fn test_stock_event_without_order_id() {
        // 库存同步事件没有 order_id，不应导致反序列化失败
        let json = r#"{"status":"reserved"}"#;
        let event: StockEvent = serde_json::from_str(json).unwrap();
        assert!(event.order_id.is_empty());
        assert_eq!(event.status, StockEventStatus::Reserved);
        assert!(event.message.is_empty());
    }

    #[test]
    fn test_order_event_round_trip() {
        let event = OrderEvent {
            order_id: "ord-3".to_string(),
            payment_id: "pay-3".to_string(),
            user_id: "user-3".to_string(),
            amount: 20.0,
            items: vec![OrderEventItem {
                product_id: "prod-a".to_string(),
                quantity: 2,
                unit_price: 10.0,
            }],
            address: "长安街 1 号".to_string(),
            status: "PENDING".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        // 线上键名为 snake_case
        assert!(json.contains("\"order_id\""));
        assert!(json.contains("\"payment_id\""));
        assert!(json.contains("\"unit_price\""));

        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.order_id, "ord-3");
        assert_eq!(back.items.len(), 1);
        assert_eq!(back.items[0].quantity, 2);
    }
}
