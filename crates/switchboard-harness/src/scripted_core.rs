//! Scripted crypto core.
//!
//! Each stateful call pops the next bundle scripted for its operation name;
//! inbound payloads are answered by payload. Unscripted calls yield an empty
//! bundle. Every call is recorded with its context.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use switchboard_client::{
    CoreCall, CoreContext, CoreError, CryptoCore, Mnemonic, Network, ParsedInvite,
};
use switchboard_core::EffectBundle;

/// Words returned for every generated mnemonic.
pub const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon \
                                 abandon abandon abandon abandon abandon about";

#[derive(Default)]
struct Script {
    by_operation: HashMap<&'static str, VecDeque<Result<EffectBundle, CoreError>>>,
    by_payload: HashMap<Vec<u8>, EffectBundle>,
    invite: ParsedInvite,
    payment_hashes: HashMap<String, String>,
    calls: Vec<(CoreCall, CoreContext)>,
}

/// Crypto core answering from a script.
#[derive(Default)]
pub struct ScriptedCore {
    script: Mutex<Script>,
}

impl ScriptedCore {
    /// Core with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `operation` call with `bundle`.
    ///
    /// `operation` is a [`CoreCall::name`].
    pub fn respond(&self, operation: &'static str, bundle: EffectBundle) {
        self.script.lock().by_operation.entry(operation).or_default().push_back(Ok(bundle));
    }

    /// Fail the next `operation` call.
    pub fn fail(&self, operation: &'static str, reason: &str) {
        self.script
            .lock()
            .by_operation
            .entry(operation)
            .or_default()
            .push_back(Err(CoreError::new(reason)));
    }

    /// Decode `payload` into `bundle`, every time it arrives.
    pub fn on_inbound(&self, payload: &[u8], bundle: EffectBundle) {
        self.script.lock().by_payload.insert(payload.to_vec(), bundle);
    }

    /// Result of parsing any invite code.
    pub fn set_invite(&self, invite: ParsedInvite) {
        self.script.lock().invite = invite;
    }

    /// Payment hash for `invoice`.
    pub fn set_payment_hash(&self, invoice: &str, hash: &str) {
        self.script.lock().payment_hashes.insert(invoice.to_string(), hash.to_string());
    }

    /// Every stateful call so far.
    pub fn calls(&self) -> Vec<CoreCall> {
        self.script.lock().calls.iter().map(|(call, _)| call.clone()).collect()
    }

    /// Contexts of every stateful call so far.
    pub fn contexts(&self) -> Vec<CoreContext> {
        self.script.lock().calls.iter().map(|(_, ctx)| ctx.clone()).collect()
    }

    /// Calls named `operation`.
    pub fn calls_named(&self, operation: &str) -> Vec<CoreCall> {
        self.calls().into_iter().filter(|c| c.name() == operation).collect()
    }
}

impl CryptoCore for ScriptedCore {
    fn mnemonic_from_entropy(&self, entropy: &[u8]) -> Result<Mnemonic, CoreError> {
        if entropy.len() != 16 {
            return Err(CoreError::new(format!("entropy must be 16 bytes, got {}", entropy.len())));
        }
        Ok(Mnemonic::new(TEST_MNEMONIC))
    }

    fn mnemonic_to_seed(&self, mnemonic: &Mnemonic) -> Result<String, CoreError> {
        if mnemonic.expose().split_whitespace().count() != 12 {
            return Err(CoreError::new("mnemonic must have 12 words"));
        }
        Ok("5eed".repeat(16))
    }

    fn xpub_from_seed(&self, seed: &str, _time: u64, network: Network) -> Result<String, CoreError> {
        Ok(format!("xpub-{}-{}", network.as_str(), &seed[..seed.len().min(8)]))
    }

    fn sign_ms(&self, _seed: &str, time: u64, _network: Network) -> Result<String, CoreError> {
        Ok(format!("sig-{time}"))
    }

    fn payment_hash_from_invoice(&self, invoice: &str) -> Result<String, CoreError> {
        self.script
            .lock()
            .payment_hashes
            .get(invoice)
            .cloned()
            .ok_or_else(|| CoreError::new(format!("undecodable invoice {invoice}")))
    }

    fn parse_invite(&self, _code: &str) -> Result<ParsedInvite, CoreError> {
        Ok(self.script.lock().invite.clone())
    }

    fn run(&self, ctx: &CoreContext, call: &CoreCall) -> Result<EffectBundle, CoreError> {
        let mut script = self.script.lock();
        script.calls.push((call.clone(), ctx.clone()));

        if let CoreCall::HandleInbound { payload, .. } = call {
            return Ok(script.by_payload.get(payload).cloned().unwrap_or_default());
        }
        script
            .by_operation
            .get_mut(call.name())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(EffectBundle::default()))
    }
}
