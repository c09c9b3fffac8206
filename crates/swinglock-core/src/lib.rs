//! Local authentication and secure-credential kernel for SwingCoach.
//!
//! Three layers, leaves first:
//!
//! - [`hygiene`] tracks and destroys transient secret buffers;
//! - [`store`] persists auth secrets through the platform keystore with an
//!   extra authenticated-encryption layer;
//! - [`authority`] runs PIN/biometric authentication, the lockout policy,
//!   and the in-memory session table with its expiry sweep.
//!
//! The platform pieces the kernel cannot own — hardware key storage, the
//! biometric prompt, the audit trail, time — are traits ([`keystore::Keystore`],
//! [`biometric::BiometricProvider`], [`audit::AuditSink`], [`clock::Clock`])
//! so the mobile shells and the test suite wire in their own.

pub mod audit;
pub mod authority;
pub mod biometric;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod hygiene;
pub mod keystore;
pub mod session;
pub mod store;

pub use audit::{AuditKind, AuditSink, TracingAuditSink};
pub use authority::{AuthOutcome, AuthResult, SessionAuthority};
pub use biometric::{BiometricCapability, BiometricPrompt, BiometricProvider};
pub use clock::{Clock, SystemClock};
pub use config::{AuthPolicy, SecurityConfig};
pub use hygiene::SecretHygiene;
pub use keystore::{Keystore, KeyringKeystore, StoreError};
pub use session::Permission;
pub use store::CredentialStore;
