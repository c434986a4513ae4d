//! Test doubles and common utilities for contract tests
//!
//! This module provides minimal test doubles that verify the ledger's
//! contracts without a database or a messaging transport.

#![allow(dead_code)]

use referral_core::error::{Error, Result};
use referral_core::identity::{Identity, IdentityKind};
use referral_core::traits::{
    CREDIT_PER_REDEMPTION, ReferralCode, Response, StoreBackend, Trigger, TriggerSource,
    USES_PER_REDEMPTION,
};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Identity with every data byte set to `seed`
pub fn identity(seed: u8) -> Identity {
    Identity::new([seed; 32], IdentityKind::User)
}

#[derive(Default)]
struct LedgerState {
    codes: HashMap<String, ReferralCode>,
    redemptions: HashMap<Identity, String>,
    phone_verified: HashSet<Identity>,
}

/// In-memory ledger with the persistent store's semantics
///
/// Enforces one redemption per identity, rejects unknown codes, and
/// credits codes under a single lock.
#[derive(Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<LedgerState>>,
    redeem_calls: Arc<AtomicUsize>,
    directory_down: Arc<AtomicBool>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a code with zeroed counters
    pub fn with_code(self, code: &str) -> Self {
        self.state.lock().unwrap().codes.insert(
            code.to_string(),
            ReferralCode {
                code: code.to_string(),
                uses: 0,
                total: 0,
            },
        );
        self
    }

    /// Give `identity` a verified phone fact
    pub fn with_verified_phone(self, identity: Identity) -> Self {
        self.state.lock().unwrap().phone_verified.insert(identity);
        self
    }

    /// Make every eligibility check fail
    pub fn set_directory_down(&self, down: bool) {
        self.directory_down.store(down, Ordering::SeqCst);
    }

    pub fn code(&self, code: &str) -> Option<ReferralCode> {
        self.state.lock().unwrap().codes.get(code).cloned()
    }

    pub fn redemption(&self, identity: &Identity) -> Option<String> {
        self.state.lock().unwrap().redemptions.get(identity).cloned()
    }

    pub fn redemption_count(&self) -> usize {
        self.state.lock().unwrap().redemptions.len()
    }

    pub fn redeem_calls(&self) -> usize {
        self.redeem_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StoreBackend for MockLedger {
    async fn lookup_redemption(&self, identity: &Identity) -> Result<String> {
        self.redemption(identity)
            .ok_or_else(|| Error::not_found(format!("no redemption for {}", identity)))
    }

    async fn redeem_code(&self, identity: &Identity, code: &str) -> Result<()> {
        self.redeem_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        if state.redemptions.contains_key(identity) {
            return Err(Error::duplicate(format!("{} has already redeemed a code", identity)));
        }

        let entry = state
            .codes
            .get_mut(code)
            .ok_or_else(|| Error::not_found(format!("referral code {}", code)))?;
        entry.uses += USES_PER_REDEMPTION;
        entry.total += CREDIT_PER_REDEMPTION;

        state.redemptions.insert(*identity, code.to_string());
        Ok(())
    }

    async fn check_eligibility(&self, identity: &Identity) -> Result<bool> {
        if self.directory_down.load(Ordering::SeqCst) {
            return Err(Error::directory("directory unreachable"));
        }
        Ok(self.state.lock().unwrap().phone_verified.contains(identity))
    }

    fn backend_name(&self) -> &'static str {
        "mock-ledger"
    }
}

/// Ledger whose redemptions take `delay` to commit
#[derive(Clone)]
pub struct SlowLedger {
    inner: MockLedger,
    delay: Duration,
}

impl SlowLedger {
    pub fn new(inner: MockLedger, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait::async_trait]
impl StoreBackend for SlowLedger {
    async fn lookup_redemption(&self, identity: &Identity) -> Result<String> {
        self.inner.lookup_redemption(identity).await
    }

    async fn redeem_code(&self, identity: &Identity, code: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.redeem_code(identity, code).await
    }

    async fn check_eligibility(&self, identity: &Identity) -> Result<bool> {
        self.inner.check_eligibility(identity).await
    }

    fn backend_name(&self) -> &'static str {
        "slow-ledger"
    }
}

/// A controlled TriggerSource that emits triggers on demand
pub struct ControlledTriggerSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Trigger>>>,
    responses: Arc<Mutex<Vec<Response>>>,
    fail_delivery: AtomicBool,
    respond_calls: AtomicUsize,
}

impl ControlledTriggerSource {
    /// Create a new controlled source and the sender that feeds it
    pub fn new() -> (Self, mpsc::UnboundedSender<Trigger>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let source = Self {
            rx: Mutex::new(Some(rx)),
            responses: Arc::new(Mutex::new(Vec::new())),
            fail_delivery: AtomicBool::new(false),
            respond_calls: AtomicUsize::new(0),
        };

        (source, tx)
    }

    /// Make every `respond()` fail
    pub fn failing_delivery(self) -> Self {
        self.fail_delivery.store(true, Ordering::SeqCst);
        self
    }

    /// Responses delivered so far
    pub fn responses(&self) -> Vec<Response> {
        self.responses.lock().unwrap().clone()
    }

    pub fn respond_calls(&self) -> usize {
        self.respond_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TriggerSource for ControlledTriggerSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = Trigger> + Send + 'static>> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");

        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }

    async fn respond(&self, response: Response) -> Result<()> {
        self.respond_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(Error::transport("recipient unreachable"));
        }

        self.responses.lock().unwrap().push(response);
        Ok(())
    }

    fn source_name(&self) -> &'static str {
        "controlled"
    }
}
