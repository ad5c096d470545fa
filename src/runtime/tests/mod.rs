//! Worker 单元测试
//!
//! 测试模块缓存与加载、执行串行化以及 worker 上的异步调度

mod support;
