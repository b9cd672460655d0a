// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! WHEP credential bridge.
//!
//! Browsers cannot hold long-lived router credentials, so the API mints
//! short-lived HTTP Basic pairs scoped to reading any path. The pool holds at
//! most 16 live pairs: an unused pair dies 60 s after mint, a used one 5
//! minutes after first use. Minted pairs are pushed to the router's
//! credential registry; the router's auth callback verifies against the pool
//! and marks first use.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;

pub const POOL_MAX: usize = 16;
pub const UNUSED_TTL: Duration = Duration::seconds(60);
pub const USED_TTL: Duration = Duration::minutes(5);

#[derive(Debug, Clone)]
pub struct Credential {
    pub user: String,
    pub pass: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Entry {
    pass: String,
    expires_at: DateTime<Utc>,
    used: bool,
}

struct PoolState {
    by_user: BTreeMap<String, Entry>,
}

pub struct CredPool {
    state: Mutex<PoolState>,
    /// Stable pair referenced by the router config's `readUser`/`readPass`;
    /// never handed to browsers.
    binding: (String, String),
}

fn rand_token(prefix: &str, len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let body: String = (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{prefix}{body}")
}

impl CredPool {
    pub fn new() -> CredPool {
        CredPool {
            state: Mutex::new(PoolState { by_user: BTreeMap::new() }),
            binding: (rand_token("nvr_", 8), rand_token("", 24)),
        }
    }

    pub fn binding(&self) -> (String, String) {
        self.binding.clone()
    }

    /// Mint a fresh pair. Expired pairs are collected first; if the pool is
    /// still full, the pair closest to expiry is evicted.
    pub fn mint(&self, now: DateTime<Utc>) -> Credential {
        let mut st = self.state.lock();
        Self::gc_locked(&mut st, now);
        if st.by_user.len() >= POOL_MAX {
            if let Some(user) = st
                .by_user
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(u, _)| u.clone())
            {
                st.by_user.remove(&user);
            }
        }
        let user = rand_token("whep_", 8);
        let pass = rand_token("", 24);
        let expires_at = now + UNUSED_TTL;
        st.by_user.insert(
            user.clone(),
            Entry { pass: pass.clone(), expires_at, used: false },
        );
        Credential { user, pass, expires_at }
    }

    /// Verify a pair presented to the router. First use re-arms the expiry
    /// to five minutes from that moment.
    pub fn verify(&self, user: &str, pass: &str, now: DateTime<Utc>) -> bool {
        if (user, pass) == (self.binding.0.as_str(), self.binding.1.as_str()) {
            return true;
        }
        let mut st = self.state.lock();
        let Some(entry) = st.by_user.get_mut(user) else {
            return false;
        };
        if entry.pass != pass || entry.expires_at <= now {
            return false;
        }
        if !entry.used {
            entry.used = true;
            entry.expires_at = now + USED_TTL;
        }
        true
    }

    pub fn gc(&self, now: DateTime<Utc>) -> usize {
        let mut st = self.state.lock();
        Self::gc_locked(&mut st, now)
    }

    fn gc_locked(st: &mut PoolState, now: DateTime<Utc>) -> usize {
        let before = st.by_user.len();
        st.by_user.retain(|_, e| e.expires_at > now);
        before - st.by_user.len()
    }

    /// Live pairs plus the binding pair, for the router's registry.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<(String, String)> {
        let mut st = self.state.lock();
        Self::gc_locked(&mut st, now);
        let mut out = vec![self.binding.clone()];
        out.extend(st.by_user.iter().map(|(u, e)| (u.clone(), e.pass.clone())));
        out
    }

    pub fn len(&self, now: DateTime<Utc>) -> usize {
        let mut st = self.state.lock();
        Self::gc_locked(&mut st, now);
        st.by_user.len()
    }
}

impl Default for CredPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_credentials_expire_after_a_minute() {
        let pool = CredPool::new();
        let t0 = Utc::now();
        let cred = pool.mint(t0);
        assert!(pool.verify(&cred.user, &cred.pass, t0 + Duration::seconds(59)));
        // Re-mint an unused sibling and let it lapse.
        let lapsed = pool.mint(t0);
        assert!(!pool.verify(&lapsed.user, &lapsed.pass, t0 + Duration::seconds(61)));
    }

    #[test]
    fn first_use_extends_to_five_minutes() {
        let pool = CredPool::new();
        let t0 = Utc::now();
        let cred = pool.mint(t0);
        assert!(pool.verify(&cred.user, &cred.pass, t0 + Duration::seconds(30)));
        // Used at t0+30s: alive until t0+5m30s.
        assert!(pool.verify(&cred.user, &cred.pass, t0 + Duration::seconds(320)));
        assert!(!pool.verify(&cred.user, &cred.pass, t0 + Duration::seconds(340)));
    }

    #[test]
    fn wrong_password_rejected() {
        let pool = CredPool::new();
        let t0 = Utc::now();
        let cred = pool.mint(t0);
        assert!(!pool.verify(&cred.user, "nope", t0));
        assert!(!pool.verify("ghost", &cred.pass, t0));
    }

    #[test]
    fn pool_caps_at_sixteen() {
        let pool = CredPool::new();
        let t0 = Utc::now();
        for _ in 0..40 {
            pool.mint(t0);
        }
        assert_eq!(pool.len(t0), POOL_MAX);
    }

    #[test]
    fn active_includes_binding_pair() {
        let pool = CredPool::new();
        let t0 = Utc::now();
        pool.mint(t0);
        let active = pool.active(t0);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0], pool.binding());
    }
}
