pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const CONFIG_ERROR: i32 = 2;
pub const NOT_FOUND: i32 = 3;
#[cfg_attr(feature = "lsl-support", allow(dead_code))]
pub const UNSUPPORTED: i32 = 4;
