//! 订单服务错误类型
//!
//! 在共享库 CoreError 基础上定义本服务的业务错误变体。
//! 业务错误（参数无效、商品不存在、库存不足等）是永久性失败，
//! 不应重试；瞬时的基础设施故障通过 `Core` 变体透传。

use commerce_shared::error::CoreError;
use thiserror::Error;

/// 订单服务错误类型
#[derive(Debug, Error)]
pub enum OrderError {
    // === 请求校验 ===
    #[error("参数校验失败: {0}")]
    InvalidInput(String),

    // === 下单前置条件 ===
    #[error("商品不存在: {0}")]
    ProductNotFound(String),

    #[error("库存不足: product_id={product_id}, 需要 {requested}, 可用 {available}")]
    InsufficientStock {
        product_id: String,
        requested: i32,
        available: i32,
    },

    #[error("库存预占失败: {0}")]
    ReservationFailed(String),

    // === 订单持久化 ===
    #[error("订单不存在: {0}")]
    OrderNotFound(String),

    #[error("订单已存在: {0}")]
    Conflict(String),

    // === 支付 ===
    /// 订单已落库并标记为 FAILED，库存预占已释放；
    /// 调用方可通过 GetOrder 查询到该订单
    #[error("支付发起失败: order_id={order_id}, 原因: {reason}")]
    PaymentInitiationFailed { order_id: String, reason: String },

    // === 基础设施 ===
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// 订单服务 Result 类型别名
pub type Result<T> = std::result::Result<T, OrderError>;

impl OrderError {
    /// 检查是否为可重试的错误
    ///
    /// 只有基础设施层的瞬时故障可以重试；业务错误重试不会改变结果。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Core(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 获取错误码（用于 API 响应与日志聚合）
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::ReservationFailed(_) => "RESERVATION_FAILED",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::Conflict(_) => "ORDER_CONFLICT",
            Self::PaymentInitiationFailed { .. } => "PAYMENT_INITIATION_FAILED",
            Self::Core(e) => e.code(),
        }
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(err: sqlx::Error) -> Self {
        Self::Core(CoreError::Database(err))
    }
}

impl From<OrderError> for tonic::Status {
    fn from(err: OrderError) -> Self {
        use tonic::Status;

        match &err {
            OrderError::InvalidInput(_) => Status::invalid_argument(err.to_string()),
            OrderError::ProductNotFound(_) | OrderError::OrderNotFound(_) => {
                Status::not_found(err.to_string())
            }
            OrderError::InsufficientStock { .. } | OrderError::ReservationFailed(_) => {
                Status::failed_precondition(err.to_string())
            }
            OrderError::Conflict(_) => Status::already_exists(err.to_string()),
            OrderError::PaymentInitiationFailed { .. } => Status::internal(err.to_string()),
            OrderError::Core(e) => e.to_grpc_status(),
        }
    }
}
