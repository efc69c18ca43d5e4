//! 代理配置编译与订阅同步核心
//!
//! - [`config`]：把节点、代理链、代理集合与路由规则编译为引擎配置
//! - [`rules`]：规则条目解析、DNS / 路由规则编译与规则集收集
//! - [`subscription`]：订阅获取、解析与分组同步
//! - [`store`]：节点 / 分组 / 规则的持久化
pub mod config;
pub mod error;
pub mod models;
pub mod rules;
pub mod store;
pub mod subscription;
pub mod utils;
