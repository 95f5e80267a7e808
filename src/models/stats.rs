use serde::Serialize;

/// Counters shown on the superadmin overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub total_users: i64,
    pub total_admins: i64,
    pub total_regular_users: i64,
    pub total_tokens: i64,
    pub active_tokens: i64,
    pub assigned_tokens: i64,
    pub tracking_tokens: i64,
    /// Principals created in the last 30 days.
    pub recent_registrations: i64,
}

/// The admin dashboard view: token counters plus the number of plain users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_users: i64,
    pub total_tokens: i64,
    pub active_tokens: i64,
    pub assigned_tokens: i64,
    pub tracking_tokens: i64,
}

impl From<&SystemStats> for DashboardStats {
    fn from(stats: &SystemStats) -> Self {
        Self {
            total_users: stats.total_regular_users,
            total_tokens: stats.total_tokens,
            active_tokens: stats.active_tokens,
            assigned_tokens: stats.assigned_tokens,
            tracking_tokens: stats.tracking_tokens,
        }
    }
}
