use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Capability tokens granted to a session at creation. The set is immutable
/// afterward; escalation requires a fresh authentication and a new session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Camera,
    Media,
    Settings,
    DataExport,
    DataDelete,
    Admin,
}

impl Permission {
    /// Everything a freshly authenticated user gets. Admin stays opt-in.
    pub fn default_set() -> HashSet<Permission> {
        [
            Permission::Camera,
            Permission::Media,
            Permission::Settings,
            Permission::DataExport,
            Permission::DataDelete,
        ]
        .into_iter()
        .collect()
    }
}

/// A time-bounded, permissioned authentication grant. Lives only in the
/// authority's in-memory table; process death requires re-authentication.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    last_activity_millis: AtomicI64,
    permissions: HashSet<Permission>,
    active: AtomicBool,
}

impl Session {
    pub fn new(
        id: u64,
        user_id: &str,
        created_at: DateTime<Utc>,
        permissions: HashSet<Permission>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.to_string(),
            created_at,
            last_activity_millis: AtomicI64::new(created_at.timestamp_millis()),
            permissions,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// One-way: a deactivated session never validates again, even through a
    /// stale clone of the `Arc` handle.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn last_activity_millis(&self) -> i64 {
        self.last_activity_millis.load(Ordering::SeqCst)
    }

    pub fn touch(&self, now_millis: i64) {
        self.last_activity_millis.store(now_millis, Ordering::SeqCst);
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn permissions(&self) -> &HashSet<Permission> {
        &self.permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_excludes_admin() {
        let set = Permission::default_set();
        assert_eq!(set.len(), 5);
        assert!(!set.contains(&Permission::Admin));
        assert!(set.contains(&Permission::Camera));
    }

    #[test]
    fn deactivation_is_one_way() {
        let session = Session::new(1, "local", Utc::now(), Permission::default_set());
        assert!(session.is_active());
        session.deactivate();
        assert!(!session.is_active());
    }

    #[test]
    fn touch_moves_last_activity_forward() {
        let now = Utc::now();
        let session = Session::new(1, "local", now, Permission::default_set());
        let later = now.timestamp_millis() + 30_000;
        session.touch(later);
        assert_eq!(session.last_activity_millis(), later);
    }
}
