//! Operator-facing messaging (menus, prompts, callback acknowledgements).

pub mod port;
pub mod throttled;
pub mod types;
