//! End-to-end flows through the public surface only: keystore → credential
//! store → authority, with a manual clock instead of sleeps.

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use swinglock_core::audit::MemoryAuditSink;
use swinglock_core::authority::{AuthOutcome, AuthResult, SessionAuthority};
use swinglock_core::biometric::{BiometricCapability, BiometricPrompt, ScriptedBiometric};
use swinglock_core::clock::ManualClock;
use swinglock_core::hygiene::SecretHygiene;
use swinglock_core::keystore::MemoryKeystore;
use swinglock_core::session::Permission;
use swinglock_core::store::CredentialStore;
use swinglock_core::{AuditKind, AuthPolicy, SecurityConfig};

struct Harness {
    authority: SessionAuthority,
    clock: Arc<ManualClock>,
    audit: Arc<MemoryAuditSink>,
    biometric: Arc<ScriptedBiometric>,
    store: Arc<CredentialStore>,
    policy: AuthPolicy,
}

fn harness() -> Harness {
    let policy = AuthPolicy::default();
    let clock = Arc::new(ManualClock::default());
    let audit = Arc::new(MemoryAuditSink::new());
    let biometric = Arc::new(ScriptedBiometric::new(BiometricCapability::Available));
    let store = Arc::new(CredentialStore::new(Box::new(MemoryKeystore::new()), true));
    let hygiene = Arc::new(SecretHygiene::with_settings(
        true,
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    ));
    let config = SecurityConfig {
        policy: policy.clone(),
        ..SecurityConfig::default()
    };
    let authority = SessionAuthority::new(
        store.clone(),
        hygiene,
        biometric.clone(),
        audit.clone(),
        clock.clone(),
        &config,
    );
    Harness {
        authority,
        clock,
        audit,
        biometric,
        store,
        policy,
    }
}

fn prompt_result(h: &Harness) -> AuthResult {
    let slot = Arc::new(Mutex::new(None));
    let out = slot.clone();
    h.authority.authenticate_with_biometric(
        BiometricPrompt::default(),
        Box::new(move |r| *out.lock() = Some(r)),
    );
    let result = slot.lock().take();
    result.expect("biometric callback fired exactly once")
}

#[test]
fn full_lockout_and_recovery_scenario() {
    let h = harness();
    assert!(h.authority.setup_pin("135790"));

    // Three wrong PINs: two plain failures, then the lockout engages.
    assert_eq!(
        h.authority.authenticate_with_pin("000000").outcome,
        AuthOutcome::Failed
    );
    assert_eq!(
        h.authority.authenticate_with_pin("000000").outcome,
        AuthOutcome::Failed
    );
    assert_eq!(
        h.authority.authenticate_with_pin("000000").outcome,
        AuthOutcome::LockedOut
    );

    // Even the correct PIN is refused inside the window.
    assert_eq!(
        h.authority.authenticate_with_pin("135790").outcome,
        AuthOutcome::LockedOut
    );

    // Past the window: success, fresh session, counter reset.
    h.clock.advance(ChronoDuration::seconds(
        h.policy.lockout_duration_secs as i64 + 1,
    ));
    let result = h.authority.authenticate_with_pin("135790");
    assert!(result.is_success());
    let session_id = result.session_id.unwrap();
    assert!(h.authority.validate_session(session_id));
    assert_eq!(h.authority.active_session_count(), 1);
    assert_eq!(h.audit.count_of(AuditKind::Lockout), 1);
    assert_eq!(h.audit.count_of(AuditKind::AuthSuccess), 1);
}

#[test]
fn session_lifecycle_across_timeout_and_logout() {
    let h = harness();
    h.authority.setup_pin("246802");
    let first = h
        .authority
        .authenticate_with_pin("246802")
        .session_id
        .unwrap();

    // Regular activity keeps it alive well past a single timeout span.
    for _ in 0..4 {
        h.clock.advance(ChronoDuration::seconds(
            h.policy.session_timeout_secs as i64 / 2,
        ));
        assert!(h.authority.validate_session(first));
    }

    // Explicit logout is terminal.
    h.authority.invalidate_session(first);
    assert!(!h.authority.validate_session(first));
    assert!(!h.authority.has_permission(first, Permission::Camera));

    // A new session goes idle past the timeout and the sweep reaps it.
    let second = h
        .authority
        .authenticate_with_pin("246802")
        .session_id
        .unwrap();
    h.clock.advance(ChronoDuration::seconds(
        h.policy.session_timeout_secs as i64 + 1,
    ));
    assert_eq!(h.authority.sweep_now(), 1);
    assert!(!h.authority.validate_session(second));
    assert_eq!(h.audit.count_of(AuditKind::SessionExpired), 1);
}

#[test]
fn permission_grants_are_fixed_at_creation() {
    let h = harness();
    let viewer: std::collections::HashSet<Permission> =
        [Permission::Camera, Permission::Media].into_iter().collect();
    let session_id = h.authority.create_session("local", viewer);

    for _ in 0..25 {
        assert!(h.authority.has_permission(session_id, Permission::Camera));
        assert!(h.authority.has_permission(session_id, Permission::Media));
        assert!(!h.authority.has_permission(session_id, Permission::Settings));
        assert!(!h.authority.has_permission(session_id, Permission::Admin));
    }
}

#[test]
fn biometric_fallback_and_independence_from_pin_lockout() {
    let h = harness();
    h.authority.setup_pin("135790");
    assert!(h.authority.enable_biometric());

    // Exhaust the PIN counter into lockout.
    for _ in 0..3 {
        h.authority.authenticate_with_pin("000000");
    }
    assert_eq!(
        h.authority.authenticate_with_pin("135790").outcome,
        AuthOutcome::LockedOut
    );

    // Biometric path is tracked independently and still works.
    h.biometric.push_verdict(swinglock_core::biometric::BiometricVerdict::Success);
    let result = prompt_result(&h);
    assert!(result.is_success());

    // Cancel is terminal but not an error, and never touches the counter.
    h.biometric.push_verdict(swinglock_core::biometric::BiometricVerdict::Cancelled);
    assert_eq!(prompt_result(&h).outcome, AuthOutcome::Cancelled);
}

#[test]
fn reset_authentication_forces_full_re_setup() {
    let h = harness();
    h.authority.setup_pin("135790");
    assert!(h.authority.enable_biometric());
    let session_id = h
        .authority
        .authenticate_with_pin("135790")
        .session_id
        .unwrap();

    h.authority.reset_authentication();
    assert!(!h.authority.is_pin_setup());
    assert!(!h.authority.is_biometric_enabled());
    assert!(!h.authority.validate_session(session_id));
    assert_eq!(
        h.authority.authenticate_with_pin("135790").outcome,
        AuthOutcome::Failed
    );

    // And setup works again from scratch.
    assert!(h.authority.setup_pin("111213"));
    assert!(h.authority.authenticate_with_pin("111213").is_success());
}

#[test]
fn store_survives_backup_restore_with_live_credentials() {
    let h = harness();
    h.authority.setup_pin("135790");
    let image = h.store.backup().expect("backup image");

    let restored = CredentialStore::new(Box::new(MemoryKeystore::new()), true);
    assert!(restored.restore(&image));
    assert!(restored.get_encrypted("pin_salt").is_some());
    assert!(restored.get_encrypted("pin_hash").is_some());
    assert!(restored.validate_integrity());
}
