use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analysis::{self, Analyzer};
use crate::config::SessionConfig;
use crate::decoder::{self, Row};
use crate::error::{ConfigError, Result};
use crate::generator::{BoxedRng, TrafficGenerator};
use crate::packet::Packet;
use crate::store::{CaptureStore, StoreStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// Notifications for the display layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started,
    Stopped,
    Cleared,
    PacketCaptured(u64),
    SelectionChanged(Option<u64>),
    FollowChanged(bool),
    AnalysisReady(u64),
}

/// Analysis text attached to the current selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    Pending(u64),
    Ready { id: u64, text: String },
}

impl AnalysisState {
    pub fn text(&self) -> Option<&str> {
        match self {
            AnalysisState::Idle => None,
            AnalysisState::Pending(_) => Some(analysis::ANALYSIS_PENDING),
            AnalysisState::Ready { text, .. } => Some(text),
        }
    }
}

/// Everything the display layer needs for one redraw.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub state: CaptureState,
    pub auto_follow: bool,
    pub packets: Vec<Arc<Packet>>,
    pub selected: Option<Arc<Packet>>,
    pub rows: Vec<Row>,
    pub stats: StoreStats,
    pub analysis: AnalysisState,
}

impl SessionView {
    /// Follow mode only steers scrolling while packets are arriving.
    pub fn follow_active(&self) -> bool {
        self.auto_follow && self.state == CaptureState::Capturing
    }

    pub fn selected_id(&self) -> Option<u64> {
        self.selected.as_ref().map(|p| p.id)
    }
}

struct SessionState {
    capture: CaptureState,
    store: CaptureStore,
    auto_follow: bool,
    analysis: AnalysisState,
}

/// Generator plus the id counter it advances
struct Feed {
    generator: TrafficGenerator<BoxedRng>,
    counter: u64,
}

struct Shared {
    state: RwLock<SessionState>,
    feed: Mutex<Feed>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl Shared {
    fn tick(&self) -> Arc<Packet> {
        let feed = self.feed.lock();
        let state = self.state.write();
        self.capture(feed, state)
    }

    /// Timer path. Skips the packet unless the session is capturing, checked
    /// under the same lock as the append so a tick racing `stop` is dropped.
    fn tick_while_capturing(&self) -> Option<Arc<Packet>> {
        let feed = self.feed.lock();
        let state = self.state.write();
        if state.capture != CaptureState::Capturing {
            return None;
        }
        Some(self.capture(feed, state))
    }

    // Both guards are held through the append so ids land in order
    fn capture(
        &self,
        mut feed: MutexGuard<'_, Feed>,
        mut state: RwLockWriteGuard<'_, SessionState>,
    ) -> Arc<Packet> {
        let Feed { generator, counter } = &mut *feed;
        let packet = Arc::new(generator.generate(counter));

        let previous = state.store.selected_id();
        let evicted = state.store.append(packet.clone());
        let selection_lost = previous.is_some() && state.store.selected_id().is_none();
        if selection_lost {
            state.store.deselect();
            state.analysis = AnalysisState::Idle;
        }
        drop(state);
        drop(feed);

        if evicted > 0 {
            debug!("Capture window full, evicted {} packet(s)", evicted);
        }

        self.notify(SessionEvent::PacketCaptured(packet.id));
        if selection_lost {
            debug!("Selected packet {:?} evicted", previous);
            self.notify(SessionEvent::SelectionChanged(None));
        }
        packet
    }

    fn notify(&self, event: SessionEvent) {
        // Receivers that went away are dropped here
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Drives synthetic capture into a bounded store and tracks what the
/// operator is looking at.
///
/// `Idle -> Capturing` on `start`, back on `stop`. While capturing, a Tokio
/// task generates one packet every `tick_interval`. All mutation goes through
/// the single timer task or the caller's commands; readers take snapshots.
pub struct CaptureSession {
    config: SessionConfig,
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureSession {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let generator = TrafficGenerator::with_payload_cap(config.build_rng(), config.payload_cap);
        Self::with_generator(config, generator)
    }

    /// Build a session around a caller-supplied generator (deterministic tests).
    /// The generator's payload cap must match `config.payload_cap`.
    pub fn with_generator(
        config: SessionConfig,
        generator: TrafficGenerator<BoxedRng>,
    ) -> Result<Self> {
        config.validate()?;
        if generator.payload_cap() != config.payload_cap {
            return Err(ConfigError::PayloadCapMismatch {
                config: config.payload_cap,
                generator: generator.payload_cap(),
            }
            .into());
        }

        let shared = Shared {
            state: RwLock::new(SessionState {
                capture: CaptureState::Idle,
                store: CaptureStore::with_capacity(config.capacity),
                auto_follow: true,
                analysis: AnalysisState::Idle,
            }),
            feed: Mutex::new(Feed {
                generator,
                counter: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
        };

        Ok(Self {
            config,
            shared: Arc::new(shared),
            timer: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Begin periodic generation. Must run inside a Tokio runtime. A second
    /// call while capturing keeps the existing timer.
    pub fn start(&self) {
        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Capture already running, ignoring start");
            return;
        }

        self.shared.state.write().capture = CaptureState::Capturing;

        let shared = self.shared.clone();
        let period = self.config.tick_interval;
        *timer = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                shared.tick_while_capturing();
            }
        }));

        info!(
            "Capture started (interval {:?}, capacity {})",
            period, self.config.capacity
        );
        self.shared.notify(SessionEvent::Started);
    }

    /// Cancel the timer. Captured packets stay in the store.
    pub fn stop(&self) {
        let Some(handle) = self.timer.lock().take() else {
            debug!("Capture not running, ignoring stop");
            return;
        };
        handle.abort();

        let held = {
            let mut state = self.shared.state.write();
            state.capture = CaptureState::Idle;
            state.store.len()
        };

        info!("Capture stopped with {} packets held", held);
        self.shared.notify(SessionEvent::Stopped);
    }

    pub fn toggle(&self) {
        match self.state() {
            CaptureState::Idle => self.start(),
            CaptureState::Capturing => self.stop(),
        }
    }

    /// Empty the store and drop the selection. Capture state is untouched.
    pub fn clear(&self) {
        let (dropped, had_selection) = {
            let mut state = self.shared.state.write();
            let dropped = state.store.len();
            let had_selection = state.store.selected_id().is_some();
            state.store.clear();
            state.analysis = AnalysisState::Idle;
            (dropped, had_selection)
        };

        info!("Cleared {} packets from capture", dropped);
        self.shared.notify(SessionEvent::Cleared);
        if had_selection {
            self.shared.notify(SessionEvent::SelectionChanged(None));
        }
    }

    /// Generate one packet immediately, outside the timer.
    pub fn tick(&self) -> Arc<Packet> {
        self.shared.tick()
    }

    /// Select a held packet. Any explicit selection turns follow mode off;
    /// an id that is no longer held leaves nothing selected.
    pub fn select(&self, id: u64) -> bool {
        let (found, follow_was_on, changed) = {
            let mut state = self.shared.state.write();
            let previous = state.store.selected_id();
            let found = state.store.select(id);
            let follow_was_on = std::mem::replace(&mut state.auto_follow, false);
            let changed = previous != state.store.selected_id();
            if changed {
                state.analysis = AnalysisState::Idle;
            }
            (found, follow_was_on, changed)
        };

        if !found {
            debug!("Packet {} is not in the capture window, selection cleared", id);
        }
        if follow_was_on {
            self.shared.notify(SessionEvent::FollowChanged(false));
        }
        if changed {
            self.shared
                .notify(SessionEvent::SelectionChanged(found.then_some(id)));
        }
        found
    }

    pub fn deselect(&self) {
        let changed = {
            let mut state = self.shared.state.write();
            let changed = state.store.selected_id().is_some();
            state.store.deselect();
            state.analysis = AnalysisState::Idle;
            changed
        };
        if changed {
            self.shared.notify(SessionEvent::SelectionChanged(None));
        }
    }

    /// Re-enable follow mode after an explicit selection turned it off.
    pub fn resume_follow(&self) {
        let was_on = std::mem::replace(&mut self.shared.state.write().auto_follow, true);
        if !was_on {
            self.shared.notify(SessionEvent::FollowChanged(true));
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state.read().capture
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::Capturing
    }

    pub fn auto_follow(&self) -> bool {
        self.shared.state.read().auto_follow
    }

    pub fn selected_id(&self) -> Option<u64> {
        self.shared.state.read().store.selected_id()
    }

    pub fn selected(&self) -> Option<Arc<Packet>> {
        self.shared.state.read().store.selected()
    }

    pub fn packet(&self, id: u64) -> Option<Arc<Packet>> {
        self.shared.state.read().store.get(id)
    }

    pub fn snapshot(&self) -> Vec<Arc<Packet>> {
        self.shared.state.read().store.snapshot()
    }

    pub fn stats(&self) -> StoreStats {
        self.shared.state.read().store.stats()
    }

    /// Decoded rows of the selected payload; empty when nothing is selected
    /// or the payload is empty.
    pub fn selected_rows(&self) -> Vec<Row> {
        self.selected()
            .map(|p| decoder::decode_rows(&p.payload))
            .unwrap_or_default()
    }

    pub fn view(&self) -> SessionView {
        let (state, auto_follow, packets, selected, stats, analysis) = {
            let state = self.shared.state.read();
            (
                state.capture,
                state.auto_follow,
                state.store.snapshot(),
                state.store.selected(),
                state.store.stats(),
                state.analysis.clone(),
            )
        };

        // Decode outside the lock
        let rows = selected
            .as_ref()
            .map(|p| decoder::decode_rows(&p.payload))
            .unwrap_or_default();

        SessionView {
            state,
            auto_follow,
            packets,
            selected,
            rows,
            stats,
            analysis,
        }
    }

    /// Receive a notification for every state change from now on.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = channel::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Analyze the selected packet on a background task. The result is kept
    /// only if that packet is still selected when it arrives.
    pub fn request_analysis<A>(&self, analyzer: Arc<A>) -> Option<JoinHandle<()>>
    where
        A: Analyzer + Send + Sync + 'static,
    {
        let packet = {
            let mut state = self.shared.state.write();
            let packet = state.store.selected()?;
            state.analysis = AnalysisState::Pending(packet.id);
            packet
        };

        let id = packet.id;
        let shared = self.shared.clone();
        let task = analysis::spawn_analysis(analyzer, Packet::clone(&packet));

        Some(tokio::spawn(async move {
            let text = match task.await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Analysis task for packet {} did not finish: {}", id, e);
                    analysis::ANALYSIS_FALLBACK.to_string()
                }
            };

            let stored = {
                let mut state = shared.state.write();
                if state.analysis == AnalysisState::Pending(id)
                    && state.store.selected_id() == Some(id)
                {
                    state.analysis = AnalysisState::Ready { id, text };
                    true
                } else {
                    false
                }
            };

            if stored {
                shared.notify(SessionEvent::AnalysisReady(id));
            } else {
                debug!("Dropping analysis for packet {}, selection moved on", id);
            }
        }))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ANALYSIS_FALLBACK, PortProfileAnalyzer};
    use crate::error::AnalysisError;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    fn seeded_generator(payload_cap: usize) -> TrafficGenerator<BoxedRng> {
        TrafficGenerator::with_payload_cap(
            Box::new(StdRng::seed_from_u64(11)) as BoxedRng,
            payload_cap,
        )
    }

    fn session(capacity: usize) -> CaptureSession {
        CaptureSession::new(SessionConfig {
            capacity,
            seed: Some(7),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_initial_state() {
        let session = session(10);
        let view = session.view();
        assert_eq!(view.state, CaptureState::Idle);
        assert!(view.auto_follow);
        assert!(!view.follow_active());
        assert!(view.packets.is_empty());
        assert!(view.selected.is_none());
        assert!(view.rows.is_empty());
        assert_eq!(view.analysis, AnalysisState::Idle);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = CaptureSession::new(SessionConfig {
            capacity: 0,
            ..Default::default()
        });
        assert!(result.is_err());

        let result = CaptureSession::new(SessionConfig {
            payload_cap: 1500,
            ..Default::default()
        });
        assert!(matches!(
            result,
            Err(crate::Error::Config(ConfigError::PayloadCapTooLarge { cap: 1500, .. }))
        ));
    }

    #[test]
    fn test_manual_ticks_respect_capacity() {
        let session = session(5);
        for _ in 0..12 {
            session.tick();
        }
        let ids: Vec<u64> = session.snapshot().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_injected_generator() {
        let config = SessionConfig {
            payload_cap: 32,
            ..Default::default()
        };
        let session = CaptureSession::with_generator(config, seeded_generator(32)).unwrap();
        let packet = session.tick();
        assert_eq!(packet.id, 1);
        assert_eq!(packet.payload.len(), 32);
    }

    #[test]
    fn test_injected_generator_validates_config() {
        let zero_interval = SessionConfig {
            tick_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            CaptureSession::with_generator(zero_interval, seeded_generator(256)),
            Err(crate::Error::Config(ConfigError::ZeroTickInterval))
        ));

        let zero_capacity = SessionConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            CaptureSession::with_generator(zero_capacity, seeded_generator(256)),
            Err(crate::Error::Config(ConfigError::ZeroCapacity))
        ));

        assert!(matches!(
            CaptureSession::with_generator(SessionConfig::default(), seeded_generator(32)),
            Err(crate::Error::Config(ConfigError::PayloadCapMismatch {
                config: 256,
                generator: 32
            }))
        ));
    }

    #[test]
    fn test_select_disables_follow() {
        let session = session(10);
        session.tick();
        session.tick();
        assert!(session.select(2));
        assert!(!session.auto_follow());
        assert_eq!(session.selected_id(), Some(2));
        let payload_len = session.selected().map_or(0, |p| p.payload.len());
        assert_eq!(session.selected_rows().len(), payload_len.div_ceil(16));

        session.resume_follow();
        assert!(session.auto_follow());
        assert_eq!(session.selected_id(), Some(2));
    }

    #[test]
    fn test_select_unknown_id() {
        let session = session(10);
        session.tick();
        session.select(1);
        assert!(!session.select(99));
        assert_eq!(session.selected_id(), None);
        assert!(session.view().rows.is_empty());
    }

    #[test]
    fn test_selection_evicted() {
        let session = session(3);
        session.tick();
        session.select(1);
        for _ in 0..3 {
            session.tick();
        }
        assert_eq!(session.selected_id(), None);
        assert!(session.view().selected.is_none());
    }

    #[tokio::test]
    async fn test_evicted_selection_resets_analysis() {
        let session = session(2);
        session.tick();
        session.select(1);
        session
            .request_analysis(Arc::new(PortProfileAnalyzer))
            .unwrap()
            .await
            .unwrap();
        assert!(matches!(session.view().analysis, AnalysisState::Ready { id: 1, .. }));

        let rx = session.subscribe();
        session.tick();
        session.tick();

        let view = session.view();
        assert!(view.selected.is_none());
        assert_eq!(view.analysis, AnalysisState::Idle);
        assert_eq!(view.analysis.text(), None);

        let events: Vec<SessionEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::PacketCaptured(2),
                SessionEvent::PacketCaptured(3),
                SessionEvent::SelectionChanged(None),
            ]
        );
    }

    #[tokio::test]
    async fn test_pending_analysis_dropped_after_eviction() {
        let session = session(1);
        session.tick();
        session.select(1);
        let handle = session
            .request_analysis(Arc::new(PortProfileAnalyzer))
            .unwrap();
        session.tick();
        handle.await.unwrap();

        assert_eq!(session.selected_id(), None);
        assert_eq!(session.view().analysis, AnalysisState::Idle);
    }

    #[test]
    fn test_clear_keeps_state_and_counter() {
        let session = session(10);
        session.tick();
        session.tick();
        session.select(1);
        session.clear();

        let view = session.view();
        assert!(view.packets.is_empty());
        assert!(view.selected.is_none());
        assert_eq!(view.state, CaptureState::Idle);

        // Ids keep increasing across a clear
        assert_eq!(session.tick().id, 3);
    }

    #[test]
    fn test_events_reach_subscribers() {
        let session = session(10);
        let rx = session.subscribe();
        let dropped = session.subscribe();
        drop(dropped);

        session.tick();
        session.select(1);
        session.resume_follow();
        session.clear();

        let events: Vec<SessionEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::PacketCaptured(1),
                SessionEvent::FollowChanged(false),
                SessionEvent::SelectionChanged(Some(1)),
                SessionEvent::FollowChanged(true),
                SessionEvent::Cleared,
                SessionEvent::SelectionChanged(None),
            ]
        );
        assert_eq!(session.shared.subscribers.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_generates_while_capturing() {
        let session = session(100);
        session.start();
        assert!(session.is_capturing());
        assert!(session.view().follow_active());

        time::sleep(Duration::from_millis(950)).await;
        assert_eq!(session.snapshot().len(), 3);

        session.stop();
        assert_eq!(session.state(), CaptureState::Idle);
        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(session.snapshot().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_tick_skipped_once_stopped() {
        let session = session(100);
        assert!(session.shared.tick_while_capturing().is_none());
        assert!(session.snapshot().is_empty());

        session.start();
        assert_eq!(session.shared.tick_while_capturing().map(|p| p.id), Some(1));

        session.stop();
        assert!(session.shared.tick_while_capturing().is_none());
        assert_eq!(session.snapshot().len(), 1);

        // Manual ticks still work while idle
        assert_eq!(session.tick().id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_single_timer() {
        let session = session(100);
        let rx = session.subscribe();
        session.start();
        session.start();

        time::sleep(Duration::from_millis(950)).await;
        assert_eq!(session.snapshot().len(), 3);

        session.stop();
        session.stop();
        let starts = rx.try_iter().filter(|e| *e == SessionEvent::Started).count();
        assert_eq!(starts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_while_capturing() {
        let session = session(100);
        session.start();
        time::sleep(Duration::from_millis(650)).await;
        session.clear();
        assert!(session.is_capturing());
        assert!(session.snapshot().is_empty());

        time::sleep(Duration::from_millis(300)).await;
        let ids: Vec<u64> = session.snapshot().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3]);
        session.stop();
    }

    #[tokio::test]
    async fn test_analysis_for_selection() {
        let session = session(10);
        session.tick();
        assert!(session.request_analysis(Arc::new(PortProfileAnalyzer)).is_none());

        session.select(1);
        let handle = session
            .request_analysis(Arc::new(PortProfileAnalyzer))
            .unwrap();
        assert_eq!(session.view().analysis, AnalysisState::Pending(1));
        handle.await.unwrap();

        let packet = session.selected().unwrap();
        assert_eq!(
            session.view().analysis,
            AnalysisState::Ready {
                id: 1,
                text: PortProfileAnalyzer::describe(&packet)
            }
        );
    }

    struct Unavailable;

    impl Analyzer for Unavailable {
        async fn analyze(&self, _packet: &Packet) -> std::result::Result<String, AnalysisError> {
            Err(AnalysisError::Transport("network unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_analysis_shows_fallback() {
        let session = session(10);
        session.tick();
        session.select(1);
        session
            .request_analysis(Arc::new(Unavailable))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(session.view().analysis.text(), Some(ANALYSIS_FALLBACK));
    }

    #[tokio::test]
    async fn test_analysis_dropped_after_selection_change() {
        let session = session(10);
        session.tick();
        session.tick();
        session.select(1);
        let handle = session
            .request_analysis(Arc::new(PortProfileAnalyzer))
            .unwrap();
        session.select(2);
        handle.await.unwrap();
        assert_eq!(session.view().analysis, AnalysisState::Idle);
    }
}
