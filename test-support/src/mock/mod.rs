//! Mock 实现模块
//!
//! 提供模拟机器各个协作者的 Mock 实现，用于测试

pub mod arch;
pub mod image;
pub mod machine;
pub mod scheduler;
