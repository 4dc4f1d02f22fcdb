//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 业务语义错误（商品不存在、库存不足等）由各服务在自己的错误类型中定义。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum CoreError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(String),

    // ==================== 序列化错误 ====================
    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 数据库、Kafka、下游超时均视为瞬时故障；配置与序列化错误重试无意义。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Kafka(_)
                | Self::ExternalService { .. }
                | Self::ExternalServiceTimeout { .. }
        )
    }

    /// 转换为 gRPC 状态码
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::{Code, Status};

        let code = match self {
            Self::ExternalServiceTimeout { .. } => Code::DeadlineExceeded,
            Self::ExternalService { .. } => Code::Unavailable,
            _ => Code::Internal,
        };

        Status::new(code, self.to_string())
    }
}

impl From<CoreError> for tonic::Status {
    fn from(err: CoreError) -> Self {
        err.to_grpc_status()
    }
}
