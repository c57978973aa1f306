//! The gate every patched entry point calls.
//!
//! Mirrors the synthesized `LicenseGate` class: one lazily created client,
//! a synchronized `check`, and a `limited` flag for limited mode. Limited
//! mode never refuses an entry point; it records the verdict for the
//! plugin to inspect instead.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use jarlock_core::FailureMode;
use parking_lot::Mutex;
use tracing::error;

use crate::client::LicenseClient;
use crate::error::ClientError;

type Loader = Box<dyn Fn() -> Result<LicenseClient, ClientError> + Send + Sync>;

pub struct LicenseGate {
    loader: Loader,
    client: Mutex<Option<LicenseClient>>,
    limited: AtomicBool,
    /// Mode fixed at patch time. Falls back to the client's own mode.
    mode: Option<FailureMode>,
}

impl LicenseGate {
    /// Gate whose client is read from `license.properties` at `path` on
    /// first check.
    pub fn from_resource(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::with_loader(move || LicenseClient::from_resource(&path))
    }

    pub fn with_loader(
        loader: impl Fn() -> Result<LicenseClient, ClientError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            loader: Box::new(loader),
            client: Mutex::new(None),
            limited: AtomicBool::new(false),
            mode: None,
        }
    }

    /// Fix the failure mode the way the patched jar does, so it applies
    /// even when no client can be created.
    pub fn with_mode(mut self, mode: FailureMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Whether the guarded code may run.
    ///
    /// A client that cannot be created counts as an invalid license; the
    /// next call tries again. In limited mode that still lets the plugin
    /// run, with the flag raised.
    pub fn check(&self) -> bool {
        let mut slot = self.client.lock();
        if slot.is_none() {
            match (self.loader)() {
                Ok(client) => *slot = Some(client),
                Err(e) => {
                    error!(error = %e, "license client unavailable");
                    if self.mode == Some(FailureMode::LimitedMode) {
                        self.limited.store(true, Ordering::SeqCst);
                        return true;
                    }
                    return false;
                }
            }
        }
        let Some(client) = slot.as_ref() else {
            return false;
        };
        let valid = client.validate();
        if self.mode.unwrap_or(client.mode()) == FailureMode::LimitedMode {
            self.limited.store(!valid, Ordering::SeqCst);
            return true;
        }
        valid
    }

    /// Set in limited mode after an invalid verdict.
    pub fn is_limited(&self) -> bool {
        self.limited.load(Ordering::SeqCst)
    }

    /// Feature check against the client's last status. False before the
    /// first successful check.
    pub fn is_feature_allowed(&self, feature: &str) -> bool {
        self.client
            .lock()
            .as_ref()
            .is_some_and(|c| c.is_feature_allowed(feature))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use jarlock_core::LicensePolicy;

    use super::*;
    use crate::error::TransportError;
    use crate::protocol::{ValidationRequest, ValidationResponse, MSG_INVALID_KEY};
    use crate::transport::Transport;

    struct Reject;

    impl Transport for Reject {
        fn validate(&self, _: &ValidationRequest) -> Result<ValidationResponse, TransportError> {
            Ok(ValidationResponse::rejected(MSG_INVALID_KEY))
        }
    }

    fn gate(mode: FailureMode) -> LicenseGate {
        LicenseGate::with_loader(move || {
            let mut policy = LicensePolicy::new("http://unused", "p");
            policy.mode = mode;
            Ok(LicenseClient::with_transport(policy, Box::new(Reject)).with_identity("h", "ip"))
        })
    }

    #[test]
    fn test_invalid_license_refuses() {
        let g = gate(FailureMode::DisableOnly);
        assert!(!g.check());
        assert!(!g.is_limited());
    }

    #[test]
    fn test_limited_mode_runs_and_flags() {
        let g = gate(FailureMode::LimitedMode);
        assert!(g.check());
        assert!(g.is_limited());
        assert!(!g.is_feature_allowed("export"));
    }

    #[test]
    fn test_loader_failure_is_invalid_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let g = LicenseGate::with_loader(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Http("no tls".into()))
        });
        assert!(!g.check());
        assert!(!g.check());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_limited_loader_failure_runs_flagged() {
        let g = LicenseGate::with_loader(|| Err(ClientError::Http("no tls".into())))
            .with_mode(FailureMode::LimitedMode);
        assert!(g.check());
        assert!(g.is_limited());
        assert!(!g.is_feature_allowed("export"));

        for mode in [FailureMode::AllowOnError, FailureMode::DenyOnError, FailureMode::KickAndDisable] {
            let g = LicenseGate::with_loader(|| Err(ClientError::Http("no tls".into()))).with_mode(mode);
            assert!(!g.check(), "{mode}");
            assert!(!g.is_limited());
        }
    }

    #[test]
    fn test_from_resource_reads_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("license.properties");
        let mut policy = LicensePolicy::new("http://127.0.0.1:9", "p");
        policy.mode = FailureMode::AllowOnError;
        policy.connect_timeout = std::time::Duration::from_millis(100);
        policy.read_timeout = std::time::Duration::from_millis(100);
        std::fs::write(&path, policy.to_properties()).unwrap();
        let g = LicenseGate::from_resource(&path);
        // Nothing listens on the discard port, so allow-on-error lets it run.
        assert!(g.check());
    }
}
