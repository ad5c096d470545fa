//! Scheduler 单元测试
//!
//! 测试延迟队列与事件循环的调度、取消和计数行为
