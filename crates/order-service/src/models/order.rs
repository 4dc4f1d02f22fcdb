//! 订单实体与状态机
//!
//! 订单金额在创建时由商品服务返回的权威价格一次性计算，此后不可变；
//! 行项目随订单一同创建和销毁，没有独立生命周期。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OrderStatus — 订单状态机
// ---------------------------------------------------------------------------

/// 订单状态
///
/// 状态只能前进：`PENDING` -> `PAID` | `FAILED`（由支付/库存结果驱动）。
/// `PAID` -> `SHIPPED` -> `COMPLETE` 是履约侧的前向推进，由外部履约系统
/// 驱动，本服务只在枚举中预留。`PAID` / `FAILED` / `COMPLETE` 为终态，
/// 除履约推进外不允许任何迁出。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 已创建，等待支付结果
    #[default]
    Pending,
    /// 支付成功
    Paid,
    /// 支付失败或库存预占被回滚
    Failed,
    /// 已发货（外部履约系统驱动）
    Shipped,
    /// 已完成（外部履约系统驱动）
    Complete,
}

impl OrderStatus {
    /// 是否为终态
    ///
    /// 对账消费者据此判断事件是否过期：终态订单上的任何映射状态
    /// 都是空操作，保证重复投递和乱序到达的幂等性。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Failed | Self::Complete)
    }

    /// 状态机允许的前向迁移
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid)
                | (Self::Pending, Self::Failed)
                | (Self::Paid, Self::Shipped)
                | (Self::Shipped, Self::Complete)
        )
    }

    /// 数据库与 RPC 响应中使用的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Shipped => "SHIPPED",
            Self::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order / OrderItem
// ---------------------------------------------------------------------------

/// 订单行项目
///
/// `unit_price` 是下单校验时从商品服务取回并锁定的单价，
/// 使 `amount == Σ unit_price * quantity` 在事后可审计。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// 订单实体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    /// 插入顺序即行项目顺序
    pub items: Vec<OrderItem>,
    pub address: String,
    pub currency: String,
    /// 创建时一次性计算，此后不可变
    pub amount: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// 按行项目重新计算总额
    ///
    /// 仅用于断言与测试；持久化后的 amount 字段是权威值。
    pub fn computed_amount(&self) -> Decimal {
        self.items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum()
    }
}
