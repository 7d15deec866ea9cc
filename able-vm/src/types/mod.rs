//! 运行时值与共享资源。

pub mod async_handle;
pub mod channel;
pub mod error;
pub mod mutex;
pub mod resources;
pub mod status;
pub mod value;
