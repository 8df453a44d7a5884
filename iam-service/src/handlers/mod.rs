pub mod challenges;
pub mod groups;
pub mod health;
pub mod policies;
pub mod resources;
pub mod sessions;
pub mod users;

pub use health::{health_check, metrics, readiness_check};
