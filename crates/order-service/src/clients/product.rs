//! 商品服务 gRPC 客户端封装
//!
//! 订单编排只消费 GetProduct：按商品 ID 取回权威单价。
//! 通过 ProductLookup trait 抽象 gRPC 调用，便于测试时注入 mock 实现。

use std::time::Duration;

use async_trait::async_trait;
use commerce_proto::product::GetProductRequest;
use commerce_proto::product::product_service_client::ProductServiceClient;
use commerce_shared::error::CoreError;
use rust_decimal::Decimal;
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::error::{OrderError, Result};

const SERVICE_NAME: &str = "product-service";

// ---------------------------------------------------------------------------
// Trait 抽象 — 便于测试时替换为 mock 实现
// ---------------------------------------------------------------------------

/// 商品信息
///
/// 单价在取回时即转换为精确十进制，后续金额计算不经过浮点。
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
}

/// 商品查询的抽象接口
#[async_trait]
pub trait ProductLookup: Send + Sync {
    /// 解析商品 ID，商品不存在时返回 `ProductNotFound`
    async fn get(&self, product_id: &str) -> Result<ProductInfo>;
}

// ---------------------------------------------------------------------------
// gRPC 客户端实现
// ---------------------------------------------------------------------------

/// 商品服务 gRPC 客户端
///
/// 使用懒连接模式，不会在启动时尝试建立连接；连接在首次 RPC 调用时
/// 按需建立，使订单服务可以独立启动。Channel 内部带连接池，clone 是
/// 廉价操作。
pub struct ProductGrpcClient {
    client: ProductServiceClient<Channel>,
    timeout: Duration,
}

impl ProductGrpcClient {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let channel = tonic::transport::Endpoint::from_shared(addr.to_string())
            .map_err(|e| {
                OrderError::Core(CoreError::Config(format!("无效的商品服务地址: {e}")))
            })?
            .connect_lazy();

        info!(addr, "商品服务 gRPC 客户端已初始化（懒连接模式）");

        Ok(Self {
            client: ProductServiceClient::new(channel),
            timeout,
        })
    }
}

#[async_trait]
impl ProductLookup for ProductGrpcClient {
    async fn get(&self, product_id: &str) -> Result<ProductInfo> {
        let request = GetProductRequest {
            product_id: product_id.to_string(),
        };

        debug!(product_id, "调用 GetProduct");

        let mut client = self.client.clone();
        let response = tokio::time::timeout(self.timeout, client.get_product(request))
            .await
            .map_err(|_| {
                OrderError::Core(CoreError::ExternalServiceTimeout {
                    service: SERVICE_NAME.to_string(),
                })
            })?
            .map_err(|status| match status.code() {
                tonic::Code::NotFound => OrderError::ProductNotFound(product_id.to_string()),
                _ => OrderError::Core(CoreError::ExternalService {
                    service: SERVICE_NAME.to_string(),
                    message: format!("GetProduct 调用失败: {status}"),
                }),
            })?;

        let product = response.into_inner();

        let price = Decimal::try_from(product.price).map_err(|e| {
            OrderError::Core(CoreError::Internal(format!(
                "商品单价无法转换为十进制: product_id={product_id}, 原始值={}, {e}",
                product.price
            )))
        })?;

        Ok(ProductInfo {
            product_id: product.product_id,
            name: product.name,
            price,
            stock: product.stock,
        })
    }
}
