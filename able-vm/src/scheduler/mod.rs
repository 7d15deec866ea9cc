//! Able 调度器模块。
//!
//! - `executor`：单线程 FIFO 运行队列，与语言语义无关。
//! - `waker`：一次性唤醒器、可取消的等待登记与 FIFO 等待队列。
//! - `timer`：按截止时间排序的定时唤醒。

pub mod executor;
pub mod timer;
pub mod waker;
