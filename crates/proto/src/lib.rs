//! gRPC 契约定义
//!
//! 由 `tonic-prost-build` 在编译期生成。订单服务实现 `order` 包的服务端，
//! 并作为客户端消费 `product` / `inventory` / `payment` 三个下游契约。

/// 订单服务契约
pub mod order {
    include!(concat!(env!("OUT_DIR"), "/order.rs"));
}

/// 商品服务契约
pub mod product {
    include!(concat!(env!("OUT_DIR"), "/product.rs"));
}

/// 库存服务契约
pub mod inventory {
    include!(concat!(env!("OUT_DIR"), "/inventory.rs"));
}

/// 支付服务契约
pub mod payment {
    include!(concat!(env!("OUT_DIR"), "/payment.rs"));
}
