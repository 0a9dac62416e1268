// Copyright (c) 2024 The dep2p Authors

//! The witness service.
//!
//! Entry point for suspected disconnects and handler for the Realm's
//! `witness:` / `wconfirm:` broadcast traffic. Small realms remove members
//! directly on a graceful close; everything else goes through a signed
//! report, a desynchronization delay and a voting session armed with a
//! confirmation timeout. Member removal only ever happens after a session
//! completes confirmed, and always outside the session lock.

use crate::{
    error::{WitnessError, WitnessResult},
    messages::{
        decode_broadcast, encode_broadcast, now_millis, ConfirmationType, DetectionMethod,
        ReportId, WitnessConfirmation, WitnessMessage, WitnessReport,
    },
    rate_limit::{RateLimiterConfig, SlidingWindowLimiter},
    realm::{RealmBroadcast, RealmMembership},
    voting::{VoteOutcome, VotingSession, SMALL_REALM_THRESHOLD},
};
use dep2p_common::{Keypair, NodeId};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Configuration for the witness service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WitnessConfig {
    /// Inbound reports older than this are dropped (seconds).
    pub report_expiry_secs: u64,

    /// How long a session waits for confirmations (milliseconds).
    pub confirmation_timeout_ms: u64,

    /// How long processed report ids are remembered (seconds).
    pub processed_ttl_secs: u64,

    /// Upper bound on the random pre-publish delay (milliseconds).
    pub max_publish_delay_ms: u64,

    /// Cleanup cadence for processed ids, limiter keys and stale sessions
    /// (seconds).
    pub cleanup_interval_secs: u64,

    /// Report rate limiting.
    pub rate_limit: RateLimiterConfig,
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self {
            report_expiry_secs: 10,
            confirmation_timeout_ms: 2_000,
            processed_ttl_secs: 60,
            max_publish_delay_ms: 500,
            cleanup_interval_secs: 60,
            rate_limit: RateLimiterConfig::default(),
        }
    }
}

impl WitnessConfig {
    /// Validate constructor-time invariants, the nested rate-limit
    /// configuration included.
    pub fn validate(&self) -> WitnessResult<()> {
        if self.report_expiry_secs == 0
            || self.confirmation_timeout_ms == 0
            || self.processed_ttl_secs == 0
            || self.cleanup_interval_secs == 0
        {
            return Err(WitnessError::InvalidConfig(
                "intervals must be positive".to_string(),
            ));
        }
        self.rate_limit.validate()
    }

    fn report_expiry(&self) -> Duration {
        Duration::from_secs(self.report_expiry_secs)
    }

    fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    fn processed_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_ttl_secs)
    }

    fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

struct Inner {
    config: WitnessConfig,
    keypair: Keypair,
    local_id: NodeId,
    realm: Arc<dyn RealmMembership>,
    broadcast: Arc<dyn RealmBroadcast>,
    sessions: Mutex<HashMap<ReportId, VotingSession>>,
    processed: RwLock<HashMap<ReportId, Instant>>,
    last_contact: RwLock<HashMap<NodeId, u64>>,
    limiter: SlidingWindowLimiter,
    /// Worker cancellation, on a dedicated lock.
    ctx: RwLock<Option<CancellationToken>>,
}

/// Decides, by distributed vote, whether suspected-disconnected Realm
/// members should be removed.
pub struct WitnessService {
    inner: Arc<Inner>,
}

impl WitnessService {
    /// Create a service bound to one realm.
    pub fn new(
        keypair: Keypair,
        realm: Arc<dyn RealmMembership>,
        broadcast: Arc<dyn RealmBroadcast>,
        config: WitnessConfig,
    ) -> WitnessResult<Self> {
        config.validate()?;
        let limiter = SlidingWindowLimiter::new(config.rate_limit.clone());
        let local_id = keypair.node_id();
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                keypair,
                local_id,
                realm,
                broadcast,
                sessions: Mutex::new(HashMap::new()),
                processed: RwLock::new(HashMap::new()),
                last_contact: RwLock::new(HashMap::new()),
                limiter,
                ctx: RwLock::new(None),
            }),
        })
    }

    /// The local node id.
    pub fn local_id(&self) -> NodeId {
        self.inner.local_id
    }

    /// Start the periodic cleanup loop. Idempotent.
    pub fn start(&self) {
        let token = {
            let mut ctx = self.inner.ctx.write().unwrap();
            if ctx.is_some() {
                return;
            }
            let token = CancellationToken::new();
            *ctx = Some(token.clone());
            token
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.cleanup_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => inner.cleanup(),
                }
            }
        });
    }

    /// Cancel the cleanup loop. Idempotent, safe before `start`.
    pub fn stop(&self) {
        if let Some(token) = self.inner.ctx.write().unwrap().take() {
            token.cancel();
        }
    }

    /// Note a successful contact with a peer; feeds this node's votes.
    pub fn record_contact(&self, peer: NodeId) {
        self.inner
            .last_contact
            .write()
            .unwrap()
            .insert(peer, now_millis());
    }

    /// Number of live voting sessions.
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }

    /// Entry point: a connection to `peer` appears to have gone away.
    ///
    /// Non-members are ignored; rate-limited targets surface
    /// [`WitnessError::RateLimited`] so the caller skips rather than
    /// retries. Small realms remove gracefully-closed members directly;
    /// every other case publishes a signed report after a random
    /// desynchronization delay.
    pub async fn on_peer_disconnected(
        &self,
        peer: NodeId,
        method: DetectionMethod,
        last_contact_millis: u64,
    ) -> WitnessResult<()> {
        let inner = &self.inner;
        if !inner.realm.is_member(&peer) {
            trace!(peer = %peer.short(), "disconnect for non-member ignored");
            return Ok(());
        }
        if !inner.limiter.allow(&peer) {
            debug!(peer = %peer.short(), "disconnect report rate limited");
            return Err(WitnessError::RateLimited);
        }

        // A graceful close in a small realm is reliable enough to act on
        // without a vote.
        if inner.realm.member_count() < SMALL_REALM_THRESHOLD
            && method == DetectionMethod::QuicClose
        {
            info!(peer = %peer.short(), "removing gracefully-closed member without a vote");
            inner.realm.remove_member(&peer);
            return Ok(());
        }

        let mut report = WitnessReport::new(
            inner.local_id,
            peer,
            inner.realm.realm_id(),
            method,
            last_contact_millis,
        );
        report.sign(&inner.keypair);

        // Concurrent detectors randomize their send time so the channel is
        // not hit by a burst of identical reports.
        let delay = random_delay(inner.config.max_publish_delay_ms);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let payload = encode_broadcast(&WitnessMessage::Report(report.clone()))?;
        inner.broadcast.publish(payload).await?;
        debug!(report = %report.report_id, target = %peer.short(), "witness report published");

        // Process our own report locally; the broadcast loopback copy is
        // then deduplicated by the processed set.
        Arc::clone(inner).handle_report(report).await;
        Ok(())
    }

    /// Handle one payload from the Realm broadcast channel.
    pub async fn handle_broadcast(&self, payload: &[u8]) {
        match decode_broadcast(payload) {
            Ok(WitnessMessage::Report(report)) => {
                Arc::clone(&self.inner).handle_report(report).await
            }
            Ok(WitnessMessage::Confirmation(confirmation)) => {
                self.inner.handle_confirmation(confirmation)
            }
            Err(error) => debug!(%error, "dropping unintelligible broadcast payload"),
        }
    }
}

impl Drop for WitnessService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    /// Validate an inbound report, open or join its session and cast this
    /// node's own vote.
    async fn handle_report(self: Arc<Self>, report: WitnessReport) {
        if report.realm_id != self.realm.realm_id() {
            trace!("report for foreign realm dropped");
            return;
        }
        if report.age_millis(now_millis()) > self.config.report_expiry().as_millis() as u64 {
            debug!(report = %report.report_id, "expired report dropped");
            return;
        }
        {
            let mut processed = self.processed.write().unwrap();
            if processed.contains_key(&report.report_id) {
                return;
            }
            processed.insert(report.report_id, Instant::now());
        }
        if !report.verify_signature() {
            warn!(report = %report.report_id, "report signature invalid");
            return;
        }
        if !self.realm.is_member(&report.target_id) {
            debug!(target = %report.target_id.short(), "report target is not a member");
            return;
        }

        let member_count = self.realm.member_count();
        let is_new_session = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.entry(report.report_id) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(VotingSession::new(
                        report.report_id,
                        report.target_id,
                        member_count,
                    ));
                    true
                }
                std::collections::hash_map::Entry::Occupied(_) => false,
            }
        };
        if is_new_session {
            Arc::clone(&self).arm_session_timeout(report.report_id);
        }

        // Cast our own vote by comparing contact evidence.
        let own_last_contact = self
            .last_contact
            .read()
            .unwrap()
            .get(&report.target_id)
            .copied();
        let (vote, reason) = match own_last_contact {
            None => (ConfirmationType::Abstain, "no contact history"),
            Some(ours) if ours > report.last_contact_millis => {
                (ConfirmationType::Disagree, "heard from target more recently")
            }
            Some(_) => (ConfirmationType::Agree, "contact evidence matches"),
        };

        let mut confirmation = WitnessConfirmation::new(
            report.report_id,
            self.local_id,
            vote,
            own_last_contact.unwrap_or(0),
            reason,
        );
        confirmation.sign(&self.keypair);

        match encode_broadcast(&WitnessMessage::Confirmation(confirmation.clone())) {
            Ok(payload) => {
                if let Err(error) = self.broadcast.publish(payload).await {
                    debug!(%error, "confirmation publish failed");
                }
            }
            Err(error) => warn!(%error, "confirmation failed to encode"),
        }

        self.apply_confirmation(confirmation);
    }

    /// Validate and count one confirmation.
    fn handle_confirmation(&self, confirmation: WitnessConfirmation) {
        if !confirmation.verify_signature() {
            warn!(report = %confirmation.report_id, "confirmation signature invalid");
            return;
        }
        if !self.realm.is_member(&confirmation.witness_id)
            && confirmation.witness_id != self.local_id
        {
            debug!(witness = %confirmation.witness_id.short(), "confirmation from non-member");
            return;
        }
        self.apply_confirmation(confirmation);
    }

    fn apply_confirmation(&self, confirmation: WitnessConfirmation) {
        let decision = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&confirmation.report_id) else {
                trace!(report = %confirmation.report_id, "confirmation without session");
                return;
            };
            if !session.add_vote(confirmation.witness_id, confirmation.confirmation) {
                return;
            }
            match session.evaluate() {
                VoteOutcome::Pending => None,
                VoteOutcome::Completed { confirmed } => {
                    let target = session.target_id;
                    sessions.remove(&confirmation.report_id);
                    Some((target, confirmed))
                }
            }
        };

        if let Some((target, confirmed)) = decision {
            self.conclude(confirmation.report_id, target, confirmed);
        }
    }

    /// Arm the confirmation timeout: when it fires and the session is still
    /// open, decide with the votes present.
    fn arm_session_timeout(self: Arc<Self>, report_id: ReportId) {
        let timeout = self.config.confirmation_timeout();
        let inner = self;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let decision = {
                let mut sessions = inner.sessions.lock().unwrap();
                sessions.remove(&report_id).map(|mut session| {
                    let confirmed = session.finalize();
                    (session.target_id, confirmed)
                })
            };
            if let Some((target, confirmed)) = decision {
                debug!(report = %report_id, confirmed, "session timed out");
                inner.conclude(report_id, target, confirmed);
            }
        });
    }

    /// Act on a completed session. Runs outside the sessions lock.
    fn conclude(&self, report_id: ReportId, target: NodeId, confirmed: bool) {
        if confirmed {
            info!(report = %report_id, target = %target.short(), "disconnect confirmed, removing member");
            self.realm.remove_member(&target);
        } else {
            debug!(report = %report_id, target = %target.short(), "disconnect not confirmed");
        }
    }

    /// Periodic housekeeping: processed-id TTL, limiter windows, stale
    /// sessions that lost their timer.
    fn cleanup(&self) {
        let processed_ttl = self.config.processed_ttl();
        let now = Instant::now();
        self.processed
            .write()
            .unwrap()
            .retain(|_, seen| now.duration_since(*seen) < processed_ttl);

        self.limiter.cleanup();

        let stale_after = self.config.confirmation_timeout() * 10;
        self.sessions
            .lock()
            .unwrap()
            .retain(|_, session| now.duration_since(session.created_at) < stale_after);
    }
}

/// Uniform random delay in `[0, max_ms)`.
fn random_delay(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("system randomness unavailable");
    Duration::from_millis(u64::from_be_bytes(bytes) % max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dep2p_common::RealmId;
    use std::collections::HashSet;

    struct TestRealm {
        id: RealmId,
        members: Mutex<HashSet<NodeId>>,
        removed: Mutex<Vec<NodeId>>,
    }

    impl TestRealm {
        fn new(member_seeds: impl IntoIterator<Item = u8>) -> Arc<Self> {
            Arc::new(Self {
                id: RealmId::new("test-realm"),
                members: Mutex::new(
                    member_seeds
                        .into_iter()
                        .map(|seed| Keypair::from_seed([seed; 32]).node_id())
                        .collect(),
                ),
                removed: Mutex::new(Vec::new()),
            })
        }

        fn removed(&self) -> Vec<NodeId> {
            self.removed.lock().unwrap().clone()
        }
    }

    impl RealmMembership for TestRealm {
        fn realm_id(&self) -> RealmId {
            self.id.clone()
        }

        fn is_member(&self, node: &NodeId) -> bool {
            self.members.lock().unwrap().contains(node)
        }

        fn member_count(&self) -> usize {
            self.members.lock().unwrap().len()
        }

        fn remove_member(&self, node: &NodeId) {
            self.members.lock().unwrap().remove(node);
            self.removed.lock().unwrap().push(*node);
        }
    }

    struct RecordingBroadcast {
        published: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingBroadcast {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                published: Mutex::new(Vec::new()),
            })
        }

        fn payloads(&self) -> Vec<Vec<u8>> {
            self.published.lock().unwrap().clone()
        }

        fn reports(&self) -> usize {
            self.payloads()
                .iter()
                .filter(|p| p.starts_with(crate::messages::WITNESS_TAG))
                .count()
        }

        fn confirmations(&self) -> usize {
            self.payloads()
                .iter()
                .filter(|p| p.starts_with(crate::messages::CONFIRM_TAG))
                .count()
        }
    }

    #[async_trait]
    impl RealmBroadcast for RecordingBroadcast {
        async fn publish(&self, payload: Vec<u8>) -> WitnessResult<()> {
            self.published.lock().unwrap().push(payload);
            Ok(())
        }
    }

    fn keypair(seed: u8) -> Keypair {
        Keypair::from_seed([seed; 32])
    }

    fn node(seed: u8) -> NodeId {
        keypair(seed).node_id()
    }

    fn fast_config() -> WitnessConfig {
        WitnessConfig {
            confirmation_timeout_ms: 300,
            max_publish_delay_ms: 1,
            ..Default::default()
        }
    }

    fn service_in(
        local_seed: u8,
        realm: Arc<TestRealm>,
        broadcast: Arc<RecordingBroadcast>,
        config: WitnessConfig,
    ) -> WitnessService {
        WitnessService::new(keypair(local_seed), realm, broadcast, config).unwrap()
    }

    fn signed_report(reporter_seed: u8, target_seed: u8, last_contact: u64) -> WitnessReport {
        let pair = keypair(reporter_seed);
        let mut report = WitnessReport::new(
            pair.node_id(),
            node(target_seed),
            RealmId::new("test-realm"),
            DetectionMethod::QuicTimeout,
            last_contact,
        );
        report.sign(&pair);
        report
    }

    fn signed_confirmation(
        witness_seed: u8,
        report_id: ReportId,
        vote: ConfirmationType,
    ) -> WitnessConfirmation {
        let pair = keypair(witness_seed);
        let mut confirmation =
            WitnessConfirmation::new(report_id, pair.node_id(), vote, 0, "test");
        confirmation.sign(&pair);
        confirmation
    }

    async fn feed_confirmation(
        service: &WitnessService,
        witness_seed: u8,
        report_id: ReportId,
        vote: ConfirmationType,
    ) {
        let confirmation = signed_confirmation(witness_seed, report_id, vote);
        let payload =
            encode_broadcast(&WitnessMessage::Confirmation(confirmation)).unwrap();
        service.handle_broadcast(&payload).await;
    }

    #[tokio::test]
    async fn small_realm_quic_close_removes_without_vote() {
        let realm = TestRealm::new(1..=5);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        service
            .on_peer_disconnected(node(3), DetectionMethod::QuicClose, 0)
            .await
            .unwrap();

        assert_eq!(realm.removed(), vec![node(3)]);
        // No witness: publish happened.
        assert_eq!(broadcast.reports(), 0);
    }

    #[tokio::test]
    async fn small_realm_timeout_detection_publishes_a_report() {
        let realm = TestRealm::new(1..=5);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        service
            .on_peer_disconnected(node(3), DetectionMethod::QuicTimeout, 0)
            .await
            .unwrap();

        assert_eq!(broadcast.reports(), 1);
        // Not removed synchronously; the vote decides.
        assert!(realm.removed().is_empty() || realm.removed() == vec![node(3)]);
    }

    #[tokio::test]
    async fn non_member_disconnects_are_ignored() {
        let realm = TestRealm::new(1..=5);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        service
            .on_peer_disconnected(node(77), DetectionMethod::QuicClose, 0)
            .await
            .unwrap();
        assert!(realm.removed().is_empty());
        assert!(broadcast.payloads().is_empty());
    }

    #[tokio::test]
    async fn reports_are_rate_limited_per_target() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let mut config = fast_config();
        config.rate_limit.max_per_key = 2;
        let service = service_in(1, Arc::clone(&realm), broadcast, config);

        for _ in 0..2 {
            service
                .on_peer_disconnected(node(3), DetectionMethod::QuicTimeout, 0)
                .await
                .unwrap();
        }
        let error = service
            .on_peer_disconnected(node(3), DetectionMethod::QuicTimeout, 0)
            .await
            .unwrap_err();
        assert!(matches!(error, WitnessError::RateLimited));
    }

    #[tokio::test]
    async fn majority_disagree_keeps_the_member() {
        // 20 members: quorum is 10 effective votes.
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 3, 0);
        let report_id = report.report_id;
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;
        // The local node abstained (no contact history): session open.
        assert_eq!(service.active_sessions(), 1);

        for seed in 4..7 {
            feed_confirmation(&service, seed, report_id, ConfirmationType::Agree).await;
        }
        for seed in 7..14 {
            feed_confirmation(&service, seed, report_id, ConfirmationType::Disagree).await;
        }

        // 3 agree + 7 disagree reached the quorum: not confirmed.
        assert_eq!(service.active_sessions(), 0);
        assert!(realm.removed().is_empty());
        assert!(realm.is_member(&node(3)));
    }

    #[tokio::test]
    async fn agree_majority_removes_the_member() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 3, 0);
        let report_id = report.report_id;
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        for seed in 4..11 {
            feed_confirmation(&service, seed, report_id, ConfirmationType::Agree).await;
        }
        for seed in 11..14 {
            feed_confirmation(&service, seed, report_id, ConfirmationType::Disagree).await;
        }

        assert_eq!(realm.removed(), vec![node(3)]);
    }

    #[tokio::test]
    async fn own_confirmation_is_published_and_counted() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 3, 0);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        assert_eq!(broadcast.confirmations(), 1);
        match decode_broadcast(&broadcast.payloads()[0]).unwrap() {
            WitnessMessage::Confirmation(confirmation) => {
                assert_eq!(confirmation.witness_id, service.local_id());
                // No contact history for the target: abstain.
                assert_eq!(confirmation.confirmation, ConfirmationType::Abstain);
                assert!(confirmation.verify_signature());
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn newer_local_contact_votes_disagree() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        // We heard from the target just now; the report claims an older
        // last contact.
        service.record_contact(node(3));
        let report = signed_report(2, 3, 1_000);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        match decode_broadcast(&broadcast.payloads()[0]).unwrap() {
            WitnessMessage::Confirmation(confirmation) => {
                assert_eq!(confirmation.confirmation, ConfirmationType::Disagree);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_reports_open_one_session() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 3, 0);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;
        service.handle_broadcast(&payload).await;

        assert_eq!(service.active_sessions(), 1);
        assert_eq!(broadcast.confirmations(), 1);
    }

    #[tokio::test]
    async fn duplicate_votes_are_dropped() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 3, 0);
        let report_id = report.report_id;
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        for _ in 0..20 {
            feed_confirmation(&service, 4, report_id, ConfirmationType::Agree).await;
        }
        // One witness cannot reach the quorum of 10 alone.
        assert_eq!(service.active_sessions(), 1);
        assert!(realm.removed().is_empty());
    }

    #[tokio::test]
    async fn foreign_realm_reports_are_dropped() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let pair = keypair(2);
        let mut report = WitnessReport::new(
            pair.node_id(),
            node(3),
            RealmId::new("other-realm"),
            DetectionMethod::QuicTimeout,
            0,
        );
        report.sign(&pair);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        assert_eq!(service.active_sessions(), 0);
        assert!(broadcast.payloads().is_empty());
    }

    #[tokio::test]
    async fn expired_reports_are_dropped() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let pair = keypair(2);
        let mut report = WitnessReport::new(
            pair.node_id(),
            node(3),
            RealmId::new("test-realm"),
            DetectionMethod::QuicTimeout,
            0,
        );
        report.timestamp_millis = now_millis() - 60_000;
        report.sign(&pair);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        assert_eq!(service.active_sessions(), 0);
    }

    #[tokio::test]
    async fn forged_reports_are_dropped() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let mut report = signed_report(2, 3, 0);
        // Claim a different reporter than the signer.
        report.reporter_id = node(4);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        assert_eq!(service.active_sessions(), 0);
    }

    #[tokio::test]
    async fn non_member_targets_are_dropped() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 99, 0);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        assert_eq!(service.active_sessions(), 0);
    }

    #[tokio::test]
    async fn confirmations_from_non_members_are_dropped() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 3, 0);
        let report_id = report.report_id;
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        for _ in 0..12 {
            feed_confirmation(&service, 99, report_id, ConfirmationType::Agree).await;
        }
        assert_eq!(service.active_sessions(), 1);
        assert!(realm.removed().is_empty());
    }

    #[tokio::test]
    async fn timeout_without_quorum_keeps_the_member() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 3, 0);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;
        assert_eq!(service.active_sessions(), 1);

        // Wait past the confirmation timeout.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(service.active_sessions(), 0);
        assert!(realm.is_member(&node(3)));
    }

    #[tokio::test]
    async fn timeout_with_agree_majority_removes_the_member() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), fast_config());

        let report = signed_report(2, 3, 0);
        let report_id = report.report_id;
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;

        // A few agrees, below the quorum of 10.
        for seed in 4..8 {
            feed_confirmation(&service, seed, report_id, ConfirmationType::Agree).await;
        }
        assert_eq!(service.active_sessions(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(realm.removed(), vec![node(3)]);
    }

    #[tokio::test]
    async fn cleanup_expires_processed_ids() {
        let realm = TestRealm::new(1..=20);
        let broadcast = RecordingBroadcast::new();
        let mut config = fast_config();
        config.processed_ttl_secs = 1;
        let service = service_in(1, Arc::clone(&realm), Arc::clone(&broadcast), config);

        let report = signed_report(2, 3, 0);
        let payload = encode_broadcast(&WitnessMessage::Report(report)).unwrap();
        service.handle_broadcast(&payload).await;
        assert_eq!(service.inner.processed.read().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        service.inner.cleanup();
        assert!(service.inner.processed.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_stop_are_idempotent() {
        let realm = TestRealm::new(1..=5);
        let service = service_in(1, realm, RecordingBroadcast::new(), fast_config());
        service.stop();
        service.start();
        service.start();
        service.stop();
        service.stop();
    }

    #[test]
    fn constructor_rejects_broken_rate_limit_config() {
        let mut config = WitnessConfig::default();
        config.rate_limit.window_secs = 0;
        let result = WitnessService::new(
            keypair(1),
            TestRealm::new(1..=5),
            RecordingBroadcast::new(),
            config,
        );
        assert!(matches!(result, Err(WitnessError::InvalidConfig(_))));
    }
}
