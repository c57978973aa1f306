//! In-memory license authority.
//!
//! Holds products, tiers, licenses and the validation log, and answers
//! validation requests with the same rules and messages a deployed
//! authority uses. It doubles as a [`Transport`] so a client can be tested
//! end to end without a network.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AuthorityError, TransportError};
use crate::protocol::*;
use crate::transport::Transport;

/// Length of generated license keys.
pub const KEY_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub features: Vec<String>,
    /// 0 means unlimited.
    pub max_users: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub key: String,
    pub product_id: String,
    pub tier_id: Option<String>,
    pub hwid: Option<String>,
    pub ip: Option<String>,
    /// `None` or 0 for no expiry.
    pub expiry_time: Option<i64>,
    pub created_at: i64,
    pub last_validated: Option<i64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationLog {
    pub id: u64,
    pub license_key: String,
    pub hwid: String,
    pub ip: String,
    pub timestamp: i64,
    pub success: bool,
}

#[derive(Default)]
struct Store {
    products: BTreeMap<String, Product>,
    tiers: BTreeMap<String, Tier>,
    licenses: BTreeMap<String, License>,
    logs: Vec<ValidationLog>,
}

/// Thread-safe authority; every operation takes the store lock once.
#[derive(Default)]
pub struct Authority {
    store: Mutex<Store>,
}

fn new_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

/// A fresh license key: 16 upper-case hex digits.
pub fn generate_key() -> String {
    let bytes: [u8; KEY_LEN / 2] = rand::thread_rng().gen();
    hex::encode_upper(bytes)
}

impl Authority {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Products and tiers
    // ---------------------------------------------------------------------

    pub fn create_product(&self, name: &str, description: &str) -> Result<Product, AuthorityError> {
        if name.trim().is_empty() {
            return Err(AuthorityError::EmptyField("product name"));
        }
        let product = Product {
            id: new_id(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now_millis(),
        };
        self.store
            .lock()
            .products
            .insert(product.id.clone(), product.clone());
        info!(id = %product.id, name, "product created");
        Ok(product)
    }

    pub fn products(&self) -> Vec<Product> {
        self.store.lock().products.values().cloned().collect()
    }

    pub fn product(&self, id: &str) -> Option<Product> {
        self.store.lock().products.get(id).cloned()
    }

    /// `features` is the comma-separated list the tier grants.
    pub fn create_tier(
        &self,
        product_id: &str,
        name: &str,
        features: &str,
        max_users: u32,
    ) -> Result<Tier, AuthorityError> {
        if name.trim().is_empty() {
            return Err(AuthorityError::EmptyField("tier name"));
        }
        let mut store = self.store.lock();
        if !store.products.contains_key(product_id) {
            return Err(AuthorityError::UnknownProduct(product_id.to_string()));
        }
        let tier = Tier {
            id: new_id(),
            product_id: product_id.to_string(),
            name: name.to_string(),
            features: split_features(features),
            max_users,
        };
        store.tiers.insert(tier.id.clone(), tier.clone());
        info!(id = %tier.id, product = product_id, name, "tier created");
        Ok(tier)
    }

    pub fn tiers_for(&self, product_id: &str) -> Vec<Tier> {
        self.store
            .lock()
            .tiers
            .values()
            .filter(|t| t.product_id == product_id)
            .cloned()
            .collect()
    }

    // ---------------------------------------------------------------------
    // Licenses
    // ---------------------------------------------------------------------

    pub fn create_license(
        &self,
        product_id: &str,
        tier_id: Option<&str>,
        expiry_time: Option<i64>,
    ) -> Result<License, AuthorityError> {
        let mut store = self.store.lock();
        if !store.products.contains_key(product_id) {
            return Err(AuthorityError::UnknownProduct(product_id.to_string()));
        }
        if let Some(tier_id) = tier_id {
            let tier = store
                .tiers
                .get(tier_id)
                .ok_or_else(|| AuthorityError::UnknownTier(tier_id.to_string()))?;
            if tier.product_id != product_id {
                return Err(AuthorityError::TierProductMismatch {
                    tier: tier_id.to_string(),
                    product: product_id.to_string(),
                });
            }
        }
        let mut key = generate_key();
        while store.licenses.contains_key(&key) {
            key = generate_key();
        }
        let license = License {
            key: key.clone(),
            product_id: product_id.to_string(),
            tier_id: tier_id.map(str::to_string),
            hwid: None,
            ip: None,
            expiry_time,
            created_at: now_millis(),
            last_validated: None,
            active: true,
        };
        store.licenses.insert(key, license.clone());
        info!(product = product_id, "license created");
        Ok(license)
    }

    pub fn licenses(&self) -> Vec<License> {
        self.store.lock().licenses.values().cloned().collect()
    }

    pub fn license(&self, key: &str) -> Option<License> {
        self.store.lock().licenses.get(key).cloned()
    }

    /// Activate or deactivate a license.
    pub fn set_active(&self, key: &str, active: bool) -> Result<(), AuthorityError> {
        let mut store = self.store.lock();
        let license = store
            .licenses
            .get_mut(key)
            .ok_or_else(|| AuthorityError::UnknownLicense(key.to_string()))?;
        license.active = active;
        info!(active, "license status changed");
        Ok(())
    }

    /// Clear the hardware and address binding so the next successful
    /// validation binds again.
    pub fn reset_binding(&self, key: &str) -> Result<(), AuthorityError> {
        let mut store = self.store.lock();
        let license = store
            .licenses
            .get_mut(key)
            .ok_or_else(|| AuthorityError::UnknownLicense(key.to_string()))?;
        license.hwid = None;
        license.ip = None;
        info!("license binding reset");
        Ok(())
    }

    pub fn logs(&self) -> Vec<ValidationLog> {
        self.store.lock().logs.clone()
    }

    // ---------------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------------

    pub fn validate(&self, request: &ValidationRequest) -> ValidationResponse {
        self.validate_at(request, now_millis())
    }

    /// Answer `request` as of `now_ms`. Every call is logged; the first
    /// successful one binds the license to the caller's hwid and ip.
    pub fn validate_at(&self, request: &ValidationRequest, now_ms: i64) -> ValidationResponse {
        let mut store = self.store.lock();
        let response = Self::decide(&mut store, request, now_ms);
        let id = store.logs.len() as u64 + 1;
        store.logs.push(ValidationLog {
            id,
            license_key: request.license_key.clone(),
            hwid: request.hwid.clone(),
            ip: request.ip.clone(),
            timestamp: now_ms,
            success: response.valid,
        });
        debug!(valid = response.valid, message = %response.message, "validation answered");
        response
    }

    fn decide(store: &mut Store, request: &ValidationRequest, now_ms: i64) -> ValidationResponse {
        let Some(license) = store.licenses.get(&request.license_key) else {
            return ValidationResponse::rejected(MSG_INVALID_KEY);
        };
        if license.product_id != request.product_id {
            return ValidationResponse::rejected(MSG_WRONG_PRODUCT);
        }
        if !license.active {
            return ValidationResponse::rejected(MSG_DEACTIVATED);
        }
        let expiry = license.expiry_time.unwrap_or(0);
        if expiry > 0 && now_ms > expiry {
            return ValidationResponse::rejected(MSG_EXPIRED);
        }
        if let Some(bound) = license.hwid.as_deref().filter(|h| !h.is_empty()) {
            if bound != request.hwid {
                return ValidationResponse::rejected(MSG_WRONG_HARDWARE);
            }
        }

        let tier = license.tier_id.as_ref().and_then(|id| store.tiers.get(id)).cloned();
        let key = request.license_key.clone();
        if let Some(license) = store.licenses.get_mut(&key) {
            if license.hwid.as_deref().map_or(true, str::is_empty) {
                license.hwid = Some(request.hwid.clone());
                license.ip = Some(request.ip.clone());
            }
            license.last_validated = Some(now_ms);
        }

        ValidationResponse {
            valid: true,
            message: MSG_VALID.to_string(),
            tier: tier.as_ref().map(|t| t.name.clone()),
            expiry_time: Some(expiry),
            allowed_features: tier.map(|t| t.features).filter(|f| !f.is_empty()),
        }
    }
}

impl Transport for Authority {
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationResponse, TransportError> {
        Ok(self.validate_at(request, now_millis()))
    }
}

fn split_features(features: &str) -> Vec<String> {
    features
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
