//! 服务层数据传输对象
//!
//! 定义编排层的输入命令，与 RPC 请求结构解耦：gRPC 层负责
//! Proto 与 DTO 之间的转换，服务层不感知传输细节。

/// 下单命令中的行项目（单价由商品服务在校验时解析，不由调用方提供）
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: String,
    pub quantity: i32,
}

impl NewOrderItem {
    pub fn new(product_id: impl Into<String>, quantity: i32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// 下单命令
#[derive(Debug, Clone)]
pub struct CreateOrderCommand {
    pub user_id: String,
    pub items: Vec<NewOrderItem>,
    pub address: String,
    pub currency: String,
}
