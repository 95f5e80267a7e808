// Models module - Domain entity representations

pub mod location;
pub mod principal;
pub mod stats;
pub mod token;

pub use location::{GeoPoint, HistoryEntry};
pub use principal::{Principal, Role};
pub use stats::{DashboardStats, SystemStats};
pub use token::{Assignment, Token, TokenRecord};
