//! 测试支持 crate
//!
//! 提供模拟机器、调度器、可执行文件仓库等协作者的 Mock 实现

#![no_std]

extern crate alloc;

pub mod mock;
