use serde::{Deserialize, Serialize};

/// Collection endpoints wrap their items with a count.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            total: items.len(),
            items,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}
