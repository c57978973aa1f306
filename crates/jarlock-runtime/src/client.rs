//! The license client contract the gate delegates to.
//!
//! The first [`LicenseClient::validate`] call asks the authority; later
//! calls inside the cache window return the stored verdict. The cache lock
//! is held across the request, so concurrent callers share one request.

use std::path::Path;
use std::time::Instant;

use jarlock_core::{FailureMode, LicensePolicy};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::fingerprint;
use crate::protocol::{now_millis, ValidationRequest, ValidationResult};
use crate::transport::{HttpTransport, Transport};

struct Cached {
    verdict: bool,
    at: Instant,
}

pub struct LicenseClient {
    policy: LicensePolicy,
    transport: Box<dyn Transport>,
    hwid: String,
    ip: String,
    cache: Mutex<Option<Cached>>,
    status: Mutex<Option<ValidationResult>>,
}

impl LicenseClient {
    /// Load `license.properties` from `path` and talk HTTP to the server it
    /// names.
    pub fn from_resource(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ClientError::Resource {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_properties(&text)
    }

    pub fn from_properties(text: &str) -> Result<Self, ClientError> {
        let policy = LicensePolicy::from_properties(text)?;
        let transport =
            HttpTransport::new(&policy.server_url, policy.connect_timeout, policy.read_timeout)?;
        Ok(Self::with_transport(policy, Box::new(transport)))
    }

    /// Client over any transport, identified by this machine's fingerprint.
    pub fn with_transport(policy: LicensePolicy, transport: Box<dyn Transport>) -> Self {
        Self {
            policy,
            transport,
            hwid: fingerprint::hardware_id(),
            ip: fingerprint::local_ip(),
            cache: Mutex::new(None),
            status: Mutex::new(None),
        }
    }

    /// Override the machine identity sent with requests.
    pub fn with_identity(mut self, hwid: impl Into<String>, ip: impl Into<String>) -> Self {
        self.hwid = hwid.into();
        self.ip = ip.into();
        self
    }

    pub fn policy(&self) -> &LicensePolicy {
        &self.policy
    }

    pub fn mode(&self) -> FailureMode {
        self.policy.mode
    }

    pub fn hwid(&self) -> &str {
        &self.hwid
    }

    /// Whether the license is currently good.
    ///
    /// Transport failures resolve to the failure mode's error verdict and
    /// are cached like any other answer.
    pub fn validate(&self) -> bool {
        let mut cache = self.cache.lock();
        if let Some(c) = cache.as_ref() {
            if c.at.elapsed() < self.policy.cache_duration {
                debug!(verdict = c.verdict, "license verdict from cache");
                return c.verdict;
            }
        }

        let request = ValidationRequest {
            product_id: self.policy.product_id.clone(),
            license_key: self.policy.license_key.clone(),
            hwid: self.hwid.clone(),
            ip: self.ip.clone(),
        };
        let verdict = match self.transport.validate(&request) {
            Ok(response) => {
                let result = ValidationResult::from_response(response);
                let verdict = result.is_valid_at(now_millis());
                if verdict {
                    info!(tier = ?result.tier, "license validated");
                } else {
                    warn!(message = %result.message, "license rejected");
                }
                *self.status.lock() = Some(result);
                verdict
            }
            Err(e) => {
                let verdict = self.policy.mode.verdict_on_transport_error();
                warn!(error = %e, mode = %self.policy.mode, verdict, "license server unreachable");
                verdict
            }
        };
        *cache = Some(Cached {
            verdict,
            at: Instant::now(),
        });
        verdict
    }

    /// Last answer the authority gave, if any.
    pub fn status(&self) -> Option<ValidationResult> {
        self.status.lock().clone()
    }

    /// Whether the last answer grants `feature`.
    pub fn is_feature_allowed(&self, feature: &str) -> bool {
        self.status
            .lock()
            .as_ref()
            .is_some_and(|s| s.allows(feature, now_millis()))
    }

    /// Forget the cached verdict; the next `validate` asks again.
    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::TransportError;
    use crate::protocol::{ValidationResponse, MSG_VALID};

    struct Scripted {
        calls: Arc<AtomicUsize>,
        answer: Option<bool>,
    }

    impl Transport for Scripted {
        fn validate(&self, _: &ValidationRequest) -> Result<ValidationResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Some(valid) => Ok(ValidationResponse {
                    valid,
                    message: MSG_VALID.into(),
                    tier: Some("Pro".into()),
                    expiry_time: Some(0),
                    allowed_features: Some(vec!["export".into()]),
                }),
                None => Err(TransportError::Timeout),
            }
        }
    }

    fn client(mode: FailureMode, answer: Option<bool>, cache: Duration) -> (LicenseClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut policy = LicensePolicy::new("http://unused", "p");
        policy.mode = mode;
        policy.cache_duration = cache;
        let transport = Scripted { calls: calls.clone(), answer };
        (
            LicenseClient::with_transport(policy, Box::new(transport)).with_identity("h", "127.0.0.1"),
            calls,
        )
    }

    #[test]
    fn test_cache_window_limits_requests() {
        let (c, calls) = client(FailureMode::DisableOnly, Some(true), Duration::from_secs(3600));
        assert!(c.validate());
        assert!(c.validate());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        c.clear_cache();
        assert!(c.validate());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_cache_always_asks() {
        let (c, calls) = client(FailureMode::DisableOnly, Some(false), Duration::ZERO);
        assert!(!c.validate());
        assert!(!c.validate());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_transport_error_follows_mode() {
        let (allow, _) = client(FailureMode::AllowOnError, None, Duration::ZERO);
        assert!(allow.validate());
        let (deny, _) = client(FailureMode::DenyOnError, None, Duration::ZERO);
        assert!(!deny.validate());
        let (kick, _) = client(FailureMode::KickAndDisable, None, Duration::ZERO);
        assert!(!kick.validate());
        assert!(kick.status().is_none());
    }

    #[test]
    fn test_feature_gating_uses_last_status() {
        let (c, _) = client(FailureMode::DisableOnly, Some(true), Duration::from_secs(60));
        assert!(!c.is_feature_allowed("export"));
        c.validate();
        assert!(c.is_feature_allowed("export"));
        assert!(!c.is_feature_allowed("import"));
    }

    #[test]
    fn test_concurrent_callers_share_one_request() {
        let (c, calls) = client(FailureMode::DisableOnly, Some(true), Duration::from_secs(60));
        let c = Arc::new(c);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                std::thread::spawn(move || c.validate())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_resource_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = LicenseClient::from_resource(dir.path().join("license.properties")).err().unwrap();
        assert!(matches!(err, ClientError::Resource { .. }));
    }
}
