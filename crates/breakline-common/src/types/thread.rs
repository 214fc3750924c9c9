//! Thread snapshot rows

use serde::{Deserialize, Serialize};

/// One thread of the target at snapshot time. By the time the id is used
/// the thread may already have exited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: u32,
    pub base_priority: i32,
}
