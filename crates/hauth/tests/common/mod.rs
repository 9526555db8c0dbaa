#![allow(dead_code)]

use hauth::{AccessKey, AccessKeyType, AuthConfig, KeyStore, KeyStoreAuthService};
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const GUEST_KEY_ID: &str = "be2c1fcf532baaa9";
pub const GUEST_SECRET: &str = "c9a1a8ca13740018f1dd840a073ffc2e";
pub const GUEST_WRONG_SECRET: &str = "c9a1a8ca13740018";

pub fn guest_key() -> AccessKey {
    AccessKey::new(GUEST_KEY_ID, GUEST_SECRET, AccessKeyType::User).with_user("guest")
}

pub fn keys_with(items: impl IntoIterator<Item = AccessKey>) -> Arc<KeyStore> {
    let keys = Arc::new(KeyStore::new());
    for key in items {
        keys.set(key).expect("insert key");
    }
    keys
}

pub fn authority(keys: Arc<KeyStore>) -> KeyStoreAuthService {
    KeyStoreAuthService::from_config(keys, &AuthConfig::default()).expect("authority")
}

pub fn p256_pem() -> String {
    p256::SecretKey::random(&mut OsRng)
        .to_pkcs8_pem(LineEnding::LF)
        .expect("p256 pem")
        .to_string()
}

pub fn p521_pem() -> String {
    p521::SecretKey::random(&mut OsRng)
        .to_pkcs8_pem(LineEnding::LF)
        .expect("p521 pem")
        .to_string()
}

/// Sleep until just past the next whole second so second-granularity
/// expiry checks are not racing a boundary.
pub fn align_to_second() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time after epoch");
    let remaining = 1_000 - u64::from(now.subsec_millis());
    std::thread::sleep(Duration::from_millis(remaining + 20));
}
