//! 求值期间的控制流信号与宿主级错误。

pub mod signal;
