//! 下游服务 gRPC 客户端封装
//!
//! 通过 trait 抽象三个下游依赖（商品、库存、支付），便于测试时注入
//! mock 实现；真实实现使用懒连接的 tonic Channel，并对每次调用施加
//! 统一的超时上限——超时即取消调用并返回超时错误，不提交任何部分状态。

mod inventory;
mod payment;
mod product;

pub use inventory::{InventoryGrpcClient, ReservationOutcome, StockReservation};
pub use payment::{PaymentGrpcClient, PaymentInitiated, PaymentInitiation};
pub use product::{ProductGrpcClient, ProductInfo, ProductLookup};
