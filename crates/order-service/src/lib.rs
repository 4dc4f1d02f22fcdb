//! 订单编排服务
//!
//! 将一次下单请求编排为跨服务的工作流：同步校验商品与库存、整体预占、
//! 事务性落库、发起支付、发布订单事件；并通过 Kafka 消费者将支付/库存
//! 的异步结果对账回订单状态。状态迁移带终态保护，消费侧按至少一次语义
//! 处理并在重试耗尽后分流到死信队列。

pub mod clients;
pub mod consumer;
pub mod error;
pub mod grpc;
pub mod models;
pub mod repository;
pub mod service;
