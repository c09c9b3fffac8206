//! PIN/biometric authentication and session lifecycle.
//!
//! One authority instance owns the in-memory session table and the two
//! durable counters behind the lockout policy. Sessions do not survive the
//! process; durable auth state (salt, hash, counters, flags) lives in the
//! [`CredentialStore`]. Every public method returns a result value — domain
//! failures (wrong PIN, lockout, missing setup) are never `Err`.

use crate::audit::{AuditKind, AuditSink};
use crate::biometric::{
    BiometricCapability, BiometricPrompt, BiometricProvider, BiometricVerdict,
};
use crate::clock::Clock;
use crate::config::{AuthPolicy, SecurityConfig};
use crate::crypto::{derive_pin_hash, generate_salt, secure_compare};
use crate::hygiene::{SecretBuf, SecretHygiene};
use crate::session::{Permission, Session};
use crate::store::CredentialStore;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub const KEY_PIN_SALT: &str = "pin_salt";
pub const KEY_PIN_HASH: &str = "pin_hash";
pub const KEY_FAILED_ATTEMPTS: &str = "failed_attempts";
pub const KEY_LOCKOUT_TIME: &str = "lockout_time";
pub const KEY_BIOMETRIC_ENABLED: &str = "biometric_enabled";
pub const KEY_SESSION_TOKEN: &str = "session_token";
pub const KEY_LAST_ACTIVITY: &str = "last_activity";

const LOCAL_USER: &str = "local";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Success,
    Failed,
    LockedOut,
    BiometricNotAvailable,
    BiometricNotEnrolled,
    Cancelled,
    SessionExpired,
}

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub outcome: AuthOutcome,
    pub session_id: Option<u64>,
    pub message: Option<String>,
}

impl AuthResult {
    fn success(session_id: u64) -> Self {
        Self {
            outcome: AuthOutcome::Success,
            session_id: Some(session_id),
            message: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            outcome: AuthOutcome::Failed,
            session_id: None,
            message: Some(message.into()),
        }
    }

    fn locked_out(message: impl Into<String>) -> Self {
        Self {
            outcome: AuthOutcome::LockedOut,
            session_id: None,
            message: Some(message.into()),
        }
    }

    fn of(outcome: AuthOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            session_id: None,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AuthOutcome::Success
    }
}

struct AuthorityInner {
    store: Arc<CredentialStore>,
    hygiene: Arc<SecretHygiene>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    policy: AuthPolicy,
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    session_counter: AtomicU64,
    running: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

pub struct SessionAuthority {
    inner: Arc<AuthorityInner>,
    biometric: Arc<dyn BiometricProvider>,
    biometric_allowed: bool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SessionAuthority {
    pub fn new(
        store: Arc<CredentialStore>,
        hygiene: Arc<SecretHygiene>,
        biometric: Arc<dyn BiometricProvider>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: &SecurityConfig,
    ) -> Self {
        let inner = Arc::new(AuthorityInner {
            store,
            hygiene,
            audit,
            clock,
            policy: config.policy.clone(),
            sessions: RwLock::new(HashMap::new()),
            session_counter: AtomicU64::new(1),
            running: AtomicBool::new(true),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        });
        let worker_inner = inner.clone();
        let worker = std::thread::Builder::new()
            .name("session-sweep".into())
            .spawn(move || expiry_loop(worker_inner))
            .expect("spawn session sweep thread");
        Self {
            inner,
            biometric,
            biometric_allowed: config.biometric_enabled,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Configure (or replace) the device PIN. Salt and hash are written as a
    /// pair; a partial write is rolled back so a hash never exists without
    /// its salt.
    pub fn setup_pin(&self, pin: &str) -> bool {
        let inner = &self.inner;
        if pin.len() != inner.policy.pin_length || !pin.bytes().all(|b| b.is_ascii_digit()) {
            warn!(
                expected = inner.policy.pin_length,
                "pin rejected: wrong shape"
            );
            return false;
        }
        let pin_buf: SecretBuf = Arc::new(Mutex::new(pin.as_bytes().to_vec()));
        let pin_id = inner.hygiene.register(&pin_buf, "pin setup");
        let salt = generate_salt();
        let hash = {
            let guard = pin_buf.lock();
            derive_pin_hash(&guard, &salt)
        };
        inner.hygiene.clear(pin_id);
        let hash = match hash {
            Ok(hash) => hash,
            Err(e) => {
                inner.audit.critical(
                    AuditKind::StoreError,
                    "pin hash derivation failed",
                    Some(e.to_string().as_str()),
                );
                return false;
            }
        };
        let written = inner
            .store
            .store_encrypted(KEY_PIN_SALT, &salt)
            .and_then(|_| inner.store.store_encrypted(KEY_PIN_HASH, &hash))
            .and_then(|_| inner.store.store_i64(KEY_FAILED_ATTEMPTS, 0))
            .and_then(|_| inner.store.store_i64(KEY_LOCKOUT_TIME, 0));
        match written {
            Ok(()) => {
                inner.audit.event(AuditKind::PinSetup, "pin configured", None);
                true
            }
            Err(e) => {
                let _ = inner.store.remove(KEY_PIN_SALT);
                let _ = inner.store.remove(KEY_PIN_HASH);
                inner.audit.critical(
                    AuditKind::StoreError,
                    "pin setup persist failed",
                    Some(e.to_string().as_str()),
                );
                false
            }
        }
    }

    pub fn authenticate_with_pin(&self, pin: &str) -> AuthResult {
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let lockout_ms = inner.policy.lockout_duration().as_millis() as i64;

        let lockout_time = inner.store.get_i64(KEY_LOCKOUT_TIME).unwrap_or(0);
        if lockout_time > 0 {
            let elapsed = now - lockout_time;
            if elapsed < lockout_ms {
                let remaining_secs = (lockout_ms - elapsed + 999) / 1000;
                return AuthResult::locked_out(format!(
                    "locked out, retry in {remaining_secs}s"
                ));
            }
        }

        let (salt, stored_hash) = match (
            inner.store.get_encrypted(KEY_PIN_SALT),
            inner.store.get_encrypted(KEY_PIN_HASH),
        ) {
            (Some(salt), Some(hash)) => (salt, hash),
            _ => return AuthResult::failed("PIN not configured"),
        };

        let pin_buf: SecretBuf = Arc::new(Mutex::new(pin.as_bytes().to_vec()));
        let pin_id = inner.hygiene.register(&pin_buf, "pin attempt");
        let derived = {
            let guard = pin_buf.lock();
            derive_pin_hash(&guard, &salt)
        };
        inner.hygiene.clear(pin_id);
        let mut derived = match derived {
            Ok(derived) => derived,
            Err(e) => {
                inner.audit.critical(
                    AuditKind::StoreError,
                    "pin hash derivation failed",
                    Some(e.to_string().as_str()),
                );
                return AuthResult::failed("authentication unavailable");
            }
        };
        let matched = secure_compare(&derived, &stored_hash);
        inner.hygiene.wipe_bytes(&mut derived);

        if matched {
            let _ = inner.store.store_i64(KEY_FAILED_ATTEMPTS, 0);
            let _ = inner.store.store_i64(KEY_LOCKOUT_TIME, 0);
            let session_id = inner.create_session(LOCAL_USER, Permission::default_set());
            inner.audit.event(AuditKind::AuthSuccess, "pin accepted", None);
            return AuthResult::success(session_id);
        }

        let attempts = inner.store.get_i64(KEY_FAILED_ATTEMPTS).unwrap_or(0) + 1;
        let _ = inner.store.store_i64(KEY_FAILED_ATTEMPTS, attempts);
        if attempts >= inner.policy.max_failed_attempts as i64 {
            let _ = inner.store.store_i64(KEY_LOCKOUT_TIME, now);
            inner.audit.event(
                AuditKind::Lockout,
                "lockout engaged",
                Some(serde_json::json!({ "attempts": attempts })),
            );
            AuthResult::locked_out(format!(
                "too many failed attempts, locked for {}s",
                inner.policy.lockout_duration_secs
            ))
        } else {
            let remaining = inner.policy.max_failed_attempts as i64 - attempts;
            inner.audit.event(
                AuditKind::AuthFailure,
                "pin rejected",
                Some(serde_json::json!({ "remaining_attempts": remaining })),
            );
            AuthResult::failed(format!("wrong PIN, {remaining} attempts remaining"))
        }
    }

    /// Persist the biometric opt-in, but only when hardware is present and a
    /// credential is enrolled.
    pub fn enable_biometric(&self) -> bool {
        if !self.biometric_allowed {
            return false;
        }
        if self.biometric.capability() != BiometricCapability::Available {
            return false;
        }
        match self.inner.store.store_bool(KEY_BIOMETRIC_ENABLED, true) {
            Ok(()) => {
                self.inner
                    .audit
                    .event(AuditKind::BiometricEnabled, "biometric enabled", None);
                true
            }
            Err(e) => {
                self.inner.audit.critical(
                    AuditKind::StoreError,
                    "biometric flag persist failed",
                    Some(e.to_string().as_str()),
                );
                false
            }
        }
    }

    pub fn disable_biometric(&self) {
        let _ = self.inner.store.store_bool(KEY_BIOMETRIC_ENABLED, false);
    }

    pub fn is_biometric_enabled(&self) -> bool {
        self.biometric_allowed
            && self
                .inner
                .store
                .get_bool(KEY_BIOMETRIC_ENABLED)
                .unwrap_or(false)
    }

    /// Delegate to the platform prompt. `on_result` fires exactly once with
    /// a terminal result. Biometric failures are tracked independently of
    /// the PIN failure counter.
    pub fn authenticate_with_biometric(
        &self,
        prompt: BiometricPrompt,
        on_result: Box<dyn FnOnce(AuthResult) + Send>,
    ) {
        if !self.is_biometric_enabled() {
            on_result(AuthResult::of(
                AuthOutcome::BiometricNotAvailable,
                "biometric authentication not enabled",
            ));
            return;
        }
        match self.biometric.capability() {
            BiometricCapability::Available => {}
            BiometricCapability::NotEnrolled => {
                on_result(AuthResult::of(
                    AuthOutcome::BiometricNotEnrolled,
                    "no biometric credential enrolled",
                ));
                return;
            }
            BiometricCapability::NoHardware | BiometricCapability::Unavailable => {
                on_result(AuthResult::of(
                    AuthOutcome::BiometricNotAvailable,
                    "biometric hardware unavailable",
                ));
                return;
            }
        }
        let inner = self.inner.clone();
        self.biometric.authenticate(
            &prompt,
            Box::new(move |verdict| {
                let result = match verdict {
                    BiometricVerdict::Success => {
                        let session_id =
                            inner.create_session(LOCAL_USER, Permission::default_set());
                        inner
                            .audit
                            .event(AuditKind::AuthSuccess, "biometric accepted", None);
                        AuthResult::success(session_id)
                    }
                    BiometricVerdict::Failed => {
                        inner
                            .audit
                            .event(AuditKind::AuthFailure, "biometric rejected", None);
                        AuthResult::failed("biometric not recognized")
                    }
                    BiometricVerdict::Cancelled => {
                        AuthResult::of(AuthOutcome::Cancelled, "cancelled by user")
                    }
                    BiometricVerdict::Unavailable => AuthResult::of(
                        AuthOutcome::BiometricNotAvailable,
                        "biometric prompt unavailable",
                    ),
                };
                on_result(result);
            }),
        );
    }

    pub fn create_session(&self, user_id: &str, permissions: HashSet<Permission>) -> u64 {
        self.inner.create_session(user_id, permissions)
    }

    /// True only for a live session within its timeout; refreshes the
    /// session's last-activity stamp as a side effect.
    pub fn validate_session(&self, session_id: u64) -> bool {
        self.inner.validate_session(session_id)
    }

    pub fn has_permission(&self, session_id: u64, permission: Permission) -> bool {
        if !self.inner.validate_session(session_id) {
            return false;
        }
        let session = self.inner.sessions.read().get(&session_id).cloned();
        match session {
            Some(session) if session.has_permission(permission) => true,
            Some(_) => {
                self.inner.audit.event(
                    AuditKind::PermissionDenied,
                    "permission denied",
                    Some(serde_json::json!({
                        "session_id": session_id,
                        "permission": format!("{permission:?}"),
                    })),
                );
                false
            }
            None => false,
        }
    }

    pub fn invalidate_session(&self, session_id: u64) {
        self.inner
            .invalidate(session_id, AuditKind::SessionInvalidated);
    }

    pub fn invalidate_all_sessions(&self) {
        self.inner.invalidate_all();
    }

    /// Factory reset of all auth state: PIN material, counters, biometric
    /// opt-in, and every live session.
    pub fn reset_authentication(&self) {
        for key in [
            KEY_PIN_SALT,
            KEY_PIN_HASH,
            KEY_FAILED_ATTEMPTS,
            KEY_LOCKOUT_TIME,
            KEY_BIOMETRIC_ENABLED,
        ] {
            let _ = self.inner.store.remove(key);
        }
        self.inner.invalidate_all();
        self.inner
            .audit
            .event(AuditKind::ConfigReset, "authentication reset", None);
    }

    pub fn is_pin_setup(&self) -> bool {
        // A hash without its salt (or vice versa) is unusable.
        self.inner.store.get_encrypted(KEY_PIN_SALT).is_some()
            && self.inner.store.get_encrypted(KEY_PIN_HASH).is_some()
    }

    pub fn active_session_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .values()
            .filter(|s| s.is_active())
            .count()
    }

    /// Run one expiry pass immediately instead of waiting for the worker.
    pub fn sweep_now(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// App moved to background: sessions do not survive it, and transient
    /// secrets get wiped.
    pub fn on_background(&self) {
        let invalidated = self.inner.invalidate_all();
        let cleared = self.inner.hygiene.clear_all();
        info!(invalidated, cleared, "app backgrounded");
    }

    /// Stop the expiry worker (synchronous) and invalidate everything.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        {
            let _guard = self.inner.wake_lock.lock();
            self.inner.wake.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("session sweep thread panicked");
            }
        }
        self.inner.invalidate_all();
    }
}

impl Drop for SessionAuthority {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl AuthorityInner {
    fn create_session(&self, user_id: &str, permissions: HashSet<Permission>) -> u64 {
        let counter = self.session_counter.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        // Millisecond timestamp in the high bits, counter in the low 16 so
        // two sessions in the same millisecond stay distinct.
        let id = ((now.timestamp_millis() as u64) << 16) | (counter & 0xFFFF);
        let session = Arc::new(Session::new(id, user_id, now, permissions));
        self.sessions.write().insert(id, session);

        let token = uuid::Uuid::new_v4().to_string();
        let persisted = self
            .store
            .store_string(KEY_SESSION_TOKEN, &token)
            .and_then(|_| self.store.store_i64(KEY_LAST_ACTIVITY, now.timestamp_millis()));
        if let Err(e) = persisted {
            self.audit.critical(
                AuditKind::StoreError,
                "session marker persist failed",
                Some(e.to_string().as_str()),
            );
        }
        self.audit.event(
            AuditKind::SessionCreated,
            "session created",
            Some(serde_json::json!({ "session_id": id, "user_id": user_id })),
        );
        id
    }

    fn validate_session(&self, session_id: u64) -> bool {
        let session = self.sessions.read().get(&session_id).cloned();
        let Some(session) = session else {
            return false;
        };
        if !session.is_active() {
            return false;
        }
        let now = self.clock.now_millis();
        let timeout_ms = self.policy.session_timeout().as_millis() as i64;
        if now - session.last_activity_millis() > timeout_ms {
            self.invalidate(session_id, AuditKind::SessionExpired);
            return false;
        }
        session.touch(now);
        if let Err(e) = self.store.store_i64(KEY_LAST_ACTIVITY, now) {
            warn!(%e, "last-activity marker update failed");
        }
        true
    }

    fn invalidate(&self, session_id: u64, kind: AuditKind) -> bool {
        let session = self.sessions.write().remove(&session_id);
        match session {
            Some(session) => {
                session.deactivate();
                self.clear_markers();
                self.audit.event(
                    kind,
                    "session ended",
                    Some(serde_json::json!({ "session_id": session_id })),
                );
                true
            }
            None => false,
        }
    }

    fn invalidate_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write();
            sessions.drain().map(|(_, session)| session).collect()
        };
        for session in &drained {
            session.deactivate();
        }
        if !drained.is_empty() {
            self.clear_markers();
            self.audit.event(
                AuditKind::SessionInvalidated,
                "all sessions invalidated",
                Some(serde_json::json!({ "count": drained.len() })),
            );
        }
        drained.len()
    }

    fn clear_markers(&self) {
        let _ = self.store.remove(KEY_SESSION_TOKEN);
        let _ = self.store.remove(KEY_LAST_ACTIVITY);
    }

    /// Remove `session_id` only if it is still past the idle timeout when the
    /// write lock is held. A touch landing after the candidate scan keeps the
    /// session alive.
    fn remove_if_expired(&self, session_id: u64, timeout_ms: i64) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        match sessions.get(&session_id) {
            Some(s) if self.clock.now_millis() - s.last_activity_millis() > timeout_ms => {
                sessions.remove(&session_id)
            }
            _ => None,
        }
    }

    /// Eager expiry pass. Shares the timeout constant and invalidation side
    /// effects with the lazy path in `validate_session`.
    fn sweep_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let timeout_ms = self.policy.session_timeout().as_millis() as i64;
        let candidates: Vec<u64> = self
            .sessions
            .read()
            .values()
            .filter(|s| now - s.last_activity_millis() > timeout_ms)
            .map(|s| s.id)
            .collect();
        let mut expired = 0;
        for session_id in candidates {
            if let Some(session) = self.remove_if_expired(session_id, timeout_ms) {
                session.deactivate();
                self.clear_markers();
                self.audit.event(
                    AuditKind::SessionExpired,
                    "session ended",
                    Some(serde_json::json!({ "session_id": session_id })),
                );
                expired += 1;
            }
        }
        expired
    }
}

fn expiry_loop(inner: Arc<AuthorityInner>) {
    let interval = inner.policy.sweep_interval();
    let mut guard = inner.wake_lock.lock();
    while inner.running.load(Ordering::SeqCst) {
        inner.wake.wait_for(&mut guard, interval);
        if !inner.running.load(Ordering::SeqCst) {
            break;
        }
        let expired = inner.sweep_expired();
        if expired > 0 {
            debug!(expired, "session sweep pass");
        }
    }
}
