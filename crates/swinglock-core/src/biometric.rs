//! Seam over the platform biometric prompt. The kernel never talks to sensor
//! APIs; the mobile shells provide the real implementation.

use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricCapability {
    Available,
    NoHardware,
    NotEnrolled,
    Unavailable,
}

/// Terminal result of one prompt. The provider invokes the callback exactly
/// once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricVerdict {
    Success,
    Failed,
    Cancelled,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct BiometricPrompt {
    pub title: String,
    pub subtitle: Option<String>,
    pub allow_pin_fallback: bool,
}

impl Default for BiometricPrompt {
    fn default() -> Self {
        Self {
            title: "Unlock SwingCoach".to_string(),
            subtitle: None,
            allow_pin_fallback: true,
        }
    }
}

pub type BiometricCallback = Box<dyn FnOnce(BiometricVerdict) + Send>;

pub trait BiometricProvider: Send + Sync {
    fn capability(&self) -> BiometricCapability;

    fn authenticate(&self, prompt: &BiometricPrompt, on_result: BiometricCallback);
}

/// Provider for hosts with no biometric stack (desktop CLI, CI).
pub struct UnsupportedBiometric;

impl BiometricProvider for UnsupportedBiometric {
    fn capability(&self) -> BiometricCapability {
        BiometricCapability::NoHardware
    }

    fn authenticate(&self, _prompt: &BiometricPrompt, on_result: BiometricCallback) {
        on_result(BiometricVerdict::Unavailable);
    }
}

/// Test double: fixed capability plus a queue of scripted verdicts.
pub struct ScriptedBiometric {
    capability: Mutex<BiometricCapability>,
    verdicts: Mutex<VecDeque<BiometricVerdict>>,
}

impl ScriptedBiometric {
    pub fn new(capability: BiometricCapability) -> Self {
        Self {
            capability: Mutex::new(capability),
            verdicts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_capability(&self, capability: BiometricCapability) {
        *self.capability.lock() = capability;
    }

    pub fn push_verdict(&self, verdict: BiometricVerdict) {
        self.verdicts.lock().push_back(verdict);
    }
}

impl BiometricProvider for ScriptedBiometric {
    fn capability(&self) -> BiometricCapability {
        *self.capability.lock()
    }

    fn authenticate(&self, _prompt: &BiometricPrompt, on_result: BiometricCallback) {
        let verdict = self
            .verdicts
            .lock()
            .pop_front()
            .unwrap_or(BiometricVerdict::Failed);
        on_result(verdict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_provider_replays_queue() {
        let provider = ScriptedBiometric::new(BiometricCapability::Available);
        provider.push_verdict(BiometricVerdict::Success);
        provider.push_verdict(BiometricVerdict::Cancelled);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let out: std::sync::Arc<Mutex<Option<BiometricVerdict>>> =
                std::sync::Arc::new(Mutex::new(None));
            let cb_out = out.clone();
            provider.authenticate(
                &BiometricPrompt::default(),
                Box::new(move |v| *cb_out.lock() = Some(v)),
            );
            seen.push(out.lock().take().unwrap());
        }
        assert_eq!(
            seen,
            vec![
                BiometricVerdict::Success,
                BiometricVerdict::Cancelled,
                BiometricVerdict::Failed,
            ]
        );
    }
}
