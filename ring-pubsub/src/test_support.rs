//! Membership doubles used by unit tests.

use crate::data_plane::stream::DeliveryStream;
use crate::error::PubSubError;
use crate::membership::{
    CommandHandler, Membership, MembershipEvent, PeerConnection, PeerId, PubSubReply,
    PubSubRequest, RingEvent, TrackHandle, TrackOptions,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Ring of exactly one peer, which therefore owns every key.
pub(crate) struct SoloMembership {
    me: PeerId,
    ready: AtomicBool,
    handler: Mutex<Option<Arc<dyn CommandHandler>>>,
    trackers: Mutex<Vec<mpsc::UnboundedSender<RingEvent>>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl SoloMembership {
    pub(crate) fn new(me: &str, ready: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            me: me.to_string(),
            ready: AtomicBool::new(ready),
            handler: Mutex::new(None),
            trackers: Mutex::new(Vec::new()),
            events,
        })
    }

    pub(crate) fn announce_up(&self) {
        self.ready.store(true, Ordering::SeqCst);
        let _ = self.events.send(MembershipEvent::Up);
    }

    pub(crate) fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }
}

#[async_trait]
impl Membership for SoloMembership {
    fn whoami(&self) -> PeerId {
        self.me.clone()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn allocated_to_me(&self, _key: &str) -> bool {
        true
    }

    fn next(&self, _key: &str) -> Option<PeerId> {
        None
    }

    fn peers(&self, include_self: bool) -> Vec<PeerId> {
        if include_self {
            vec![self.me.clone()]
        } else {
            Vec::new()
        }
    }

    fn track(&self, key: &str, _options: TrackOptions) -> TrackHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.trackers.lock().unwrap().push(tx);
        TrackHandle::new(key, rx, || {})
    }

    fn events(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    fn serve(&self, _namespace: &'static str, handler: Arc<dyn CommandHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn request(
        &self,
        _key: &str,
        request: PubSubRequest,
    ) -> Result<PubSubReply, PubSubError> {
        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler.handle(request).await,
            None => Err(PubSubError::Transport("no handler served".to_string())),
        }
    }

    fn peer_conn(&self, peer: &str) -> Result<Arc<dyn PeerConnection>, PubSubError> {
        Err(PubSubError::PeerUnavailable(peer.to_string()))
    }

    async fn close(&self) {
        self.handler.lock().unwrap().take();
        self.trackers.lock().unwrap().clear();
        let _ = self.events.send(MembershipEvent::Close);
    }
}

/// Membership in which every key is owned by some other peer and every subscribe
/// is answered from a script: accepted, delayed or refused.
pub(crate) struct ScriptedMembership {
    state: Arc<ScriptedState>,
    trackers: Mutex<Vec<mpsc::UnboundedSender<RingEvent>>>,
    events: broadcast::Sender<MembershipEvent>,
}

struct ScriptedState {
    remote_peers: Vec<PeerId>,
    outcome: Mutex<Result<(), PubSubError>>,
    reply_delay: Mutex<Duration>,
    attempts: AtomicUsize,
    accepted: Mutex<Vec<Arc<dyn DeliveryStream>>>,
}

impl ScriptedState {
    async fn answer(&self, request: PubSubRequest) -> Result<PubSubReply, PubSubError> {
        let PubSubRequest::Subscribe(subscribe) = request else {
            return Ok(PubSubReply::Published);
        };
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.reply_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcome.lock().unwrap().clone();
        outcome?;
        let stream = subscribe.messages.ok_or(PubSubError::NoStream)?;
        self.accepted.lock().unwrap().push(stream);
        Ok(PubSubReply::Subscribed { replica: None })
    }
}

impl ScriptedMembership {
    pub(crate) fn new(remote_peers: &[&str]) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            state: Arc::new(ScriptedState {
                remote_peers: remote_peers.iter().map(|peer| peer.to_string()).collect(),
                outcome: Mutex::new(Ok(())),
                reply_delay: Mutex::new(Duration::ZERO),
                attempts: AtomicUsize::new(0),
                accepted: Mutex::new(Vec::new()),
            }),
            trackers: Mutex::new(Vec::new()),
            events,
        })
    }

    pub(crate) fn accept(&self) {
        *self.state.outcome.lock().unwrap() = Ok(());
    }

    pub(crate) fn fail_with(&self, err: PubSubError) {
        *self.state.outcome.lock().unwrap() = Err(err);
    }

    pub(crate) fn delay_replies(&self, delay: Duration) {
        *self.state.reply_delay.lock().unwrap() = delay;
    }

    /// Subscribe requests received so far, accepted or not.
    pub(crate) fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Writer half of the most recently accepted subscription.
    pub(crate) fn last_stream(&self) -> Option<Arc<dyn DeliveryStream>> {
        self.state.accepted.lock().unwrap().last().cloned()
    }
}

struct ScriptedConnection {
    peer: PeerId,
    state: Arc<ScriptedState>,
}

#[async_trait]
impl PeerConnection for ScriptedConnection {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn request(&self, request: PubSubRequest) -> Result<PubSubReply, PubSubError> {
        self.state.answer(request).await
    }
}

#[async_trait]
impl Membership for ScriptedMembership {
    fn whoami(&self) -> PeerId {
        "scripted".to_string()
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn allocated_to_me(&self, _key: &str) -> bool {
        false
    }

    fn next(&self, _key: &str) -> Option<PeerId> {
        None
    }

    fn peers(&self, include_self: bool) -> Vec<PeerId> {
        let mut peers = self.state.remote_peers.clone();
        if include_self {
            peers.push(self.whoami());
        }
        peers
    }

    fn track(&self, key: &str, _options: TrackOptions) -> TrackHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.trackers.lock().unwrap().push(tx);
        TrackHandle::new(key, rx, || {})
    }

    fn events(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    fn serve(&self, _namespace: &'static str, _handler: Arc<dyn CommandHandler>) {}

    async fn request(
        &self,
        _key: &str,
        request: PubSubRequest,
    ) -> Result<PubSubReply, PubSubError> {
        self.state.answer(request).await
    }

    fn peer_conn(&self, peer: &str) -> Result<Arc<dyn PeerConnection>, PubSubError> {
        if !self.state.remote_peers.iter().any(|remote| remote == peer) {
            return Err(PubSubError::PeerUnavailable(peer.to_string()));
        }
        Ok(Arc::new(ScriptedConnection {
            peer: peer.to_string(),
            state: self.state.clone(),
        }))
    }

    async fn close(&self) {
        self.trackers.lock().unwrap().clear();
        let _ = self.events.send(MembershipEvent::Close);
    }
}
