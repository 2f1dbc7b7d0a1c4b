// =============================================================================
// Ingestion Supervisor — never-ending connect / stream / back off loop
// =============================================================================
//
//   Disconnected -> Connecting -> Streaming -> Disconnected (on error)
//                        ^                          |
//                        +-------- backoff ---------+
//
// There is no terminal state and no retry limit. Backoff grows exponentially
// with jitter up to a ceiling and resets once a session reaches Streaming.
// The shutdown channel is honoured while connecting, streaming and sleeping.
// =============================================================================

use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{EventSource, EventStream, Ingestor};
use crate::config::ReconnectConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Streaming,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Bounded exponential backoff with symmetric jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt; grows until `max_delay`.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
            base.mul_f64(factor)
        } else {
            base
        };
        delay.min(self.config.max_delay())
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.config.initial_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let ms = (initial * self.config.multiplier.powi(exp)).min(max);
        Duration::from_millis(ms.max(0.0).round() as u64)
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

enum Flow {
    Reconnect,
    Stop,
}

pub struct Supervisor<S> {
    source: S,
    ingestor: Ingestor,
    backoff: Backoff,
    state_tx: watch::Sender<SupervisorState>,
}

impl<S: EventSource> Supervisor<S> {
    pub fn new(source: S, ingestor: Ingestor, reconnect: ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Disconnected);
        Self {
            source,
            ingestor,
            backoff: Backoff::new(reconnect),
            state_tx,
        }
    }

    /// Observe state transitions.
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("ingestion supervisor started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.transition(SupervisorState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(mut stream) => {
                    self.transition(SupervisorState::Streaming);
                    self.backoff.reset();
                    if let Flow::Stop = self.consume(&mut stream, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "error connecting event source"),
            }

            self.transition(SupervisorState::Disconnected);
            let delay = self.backoff.next_delay();
            warn!(delay_ms = delay.as_millis() as u64, "retrying event source after backoff");

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.transition(SupervisorState::Disconnected);
        info!("ingestion supervisor stopped");
    }

    async fn consume(&self, stream: &mut EventStream, shutdown: &mut watch::Receiver<bool>) -> Flow {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return Flow::Stop,
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        self.ingestor.dispatch(event);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "error in event stream");
                        return Flow::Reconnect;
                    }
                    None => {
                        warn!("event stream ended");
                        return Flow::Reconnect;
                    }
                },
            }
        }
    }

    fn transition(&self, next: SupervisorState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "ingestion state changed");
        }
    }
}

/// Resolves once shutdown is signalled or the controlling sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::Result;
    use futures_util::future::{BoxFuture, FutureExt};
    use futures_util::stream;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::app_state::SharedState;
    use crate::persistence::tests::RecordingSink;
    use crate::persistence::Persister;
    use crate::types::{EventKind, MarketEvent, Trade};

    type Session = Result<Vec<Result<MarketEvent>>>;

    /// Replays scripted sessions, then idles on a stream that never ends.
    struct ScriptedSource {
        sessions: Mutex<VecDeque<Session>>,
        connects: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(sessions: Vec<Session>) -> (Self, Arc<AtomicUsize>) {
            let connects = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    sessions: Mutex::new(sessions.into()),
                    connects: Arc::clone(&connects),
                },
                connects,
            )
        }
    }

    impl EventSource for ScriptedSource {
        fn connect(&self) -> BoxFuture<'_, Result<EventStream>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let next = self.sessions.lock().pop_front();
            async move {
                match next {
                    Some(Ok(events)) => Ok(stream::iter(events).boxed()),
                    Some(Err(e)) => Err(e),
                    None => Ok(stream::pending().boxed()),
                }
            }
            .boxed()
        }
    }

    /// Always fails to connect.
    struct DeadSource(Arc<AtomicUsize>);

    impl EventSource for DeadSource {
        fn connect(&self) -> BoxFuture<'_, Result<EventStream>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("connection refused")) }.boxed()
        }
    }

    fn trade(t: f64, price: Decimal, amount: Decimal) -> Result<MarketEvent> {
        Ok(MarketEvent::now(EventKind::Trade(Trade {
            event_time: t,
            price,
            amount,
        })))
    }

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn ingestor() -> (Ingestor, Arc<SharedState>) {
        let state = Arc::new(SharedState::new(10));
        let persister = Persister::new(Arc::new(RecordingSink::default()), Duration::from_secs(1), 16);
        (Ingestor::new(Arc::clone(&state), persister, true), state)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn backoff_grows_to_ceiling_and_resets() {
        let mut backoff = Backoff::new(ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 500,
            multiplier: 2.0,
            jitter: 0.0,
        });
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);

        backoff.reset();
        assert_eq!(backoff.next_delay().as_millis(), 100);
    }

    #[test]
    fn jittered_delay_stays_within_band_and_ceiling() {
        let mut backoff = Backoff::new(ReconnectConfig {
            initial_delay_ms: 1_000,
            max_delay_ms: 1_100,
            multiplier: 1.0,
            jitter: 0.2,
        });
        for _ in 0..200 {
            let d = backoff.next_delay();
            assert!(d >= Duration::from_millis(800), "{d:?}");
            assert!(d <= Duration::from_millis(1_100), "{d:?}");
        }
    }

    #[test]
    fn fixed_five_second_policy_is_expressible() {
        let mut backoff = Backoff::new(ReconnectConfig {
            initial_delay_ms: 5_000,
            max_delay_ms: 5_000,
            multiplier: 1.0,
            jitter: 0.0,
        });
        for _ in 0..3 {
            assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        }
    }

    #[tokio::test]
    async fn reconnects_after_stream_end_and_connect_failure() {
        let (source, connects) = ScriptedSource::new(vec![
            Ok(vec![trade(10.2, dec!(100), dec!(1)), trade(10.7, dec!(102), dec!(2))]),
            Err(anyhow::anyhow!("handshake failed")),
            Ok(vec![trade(11.1, dec!(99), dec!(1))]),
        ]);
        let (ing, state) = ingestor();
        let supervisor = Supervisor::new(source, ing, fast_reconnect());
        let mut states = supervisor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(supervisor.run(shutdown_rx));

        // Three scripted sessions plus the idle one.
        wait_until(|| connects.load(Ordering::SeqCst) >= 4).await;
        wait_until(|| *states.borrow_and_update() == SupervisorState::Streaming).await;

        let pair = state.read_candles();
        assert_eq!(pair.last.map(|c| (c.start_time, c.high, c.volume)), Some((10, dec!(102), dec!(3))));
        assert_eq!(pair.current.map(|c| (c.start_time, c.close)), Some((11, dec!(99))));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("supervisor should stop")
            .unwrap();
        assert_eq!(*states.borrow(), SupervisorState::Disconnected);
    }

    #[tokio::test]
    async fn stream_error_triggers_reconnect() {
        let (source, connects) = ScriptedSource::new(vec![Ok(vec![
            trade(1.0, dec!(1), dec!(1)),
            Err(anyhow::anyhow!("socket reset")),
            trade(1.5, dec!(50), dec!(1)),
        ])]);
        let (ing, state) = ingestor();
        let supervisor = Supervisor::new(source, ing, fast_reconnect());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        wait_until(|| connects.load(Ordering::SeqCst) >= 2).await;

        // Nothing after the error in the failed session was applied.
        assert_eq!(state.read_candles().current.map(|c| c.high), Some(dec!(1)));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff_sleep() {
        let connects = Arc::new(AtomicUsize::new(0));
        let (ing, _) = ingestor();
        let supervisor = Supervisor::new(
            DeadSource(Arc::clone(&connects)),
            ing,
            ReconnectConfig {
                initial_delay_ms: 60_000,
                max_delay_ms: 60_000,
                multiplier: 2.0,
                jitter: 0.0,
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        wait_until(|| connects.load(Ordering::SeqCst) == 1).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("shutdown must not wait out the backoff")
            .unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_signalled_shutdown_never_connects() {
        let connects = Arc::new(AtomicUsize::new(0));
        let (ing, _) = ingestor();
        let supervisor = Supervisor::new(DeadSource(Arc::clone(&connects)), ing, fast_reconnect());
        let (_tx, rx) = watch::channel(true);

        supervisor.run(rx).await;
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }
}
