//! Store Engine
//!
//! Ein Store hält genau einen unveränderlichen State und verarbeitet alle
//! Actions auf einer seriellen Queue:
//! 1. Snapshot des aktuellen States
//! 2. Middleware in Registrierungsreihenfolge (dürfen weitere Actions dispatchen)
//! 3. Reducer in Registrierungsreihenfolge (reine Transformationen)
//! 4. Veröffentlichung des neuen States an alle Beobachter
//! 5. Logging des Übergangs

use super::action_log::ActionLog;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Reducer failed: {0}")]
    ReducerFailed(String),

    #[error("Store is closed")]
    Closed,

    #[error("Dispatch was cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// NAMESPACE, REDUCER, MIDDLEWARE
// ============================================================================

/// Bindet State- und Action-Typ eines Stores zusammen
pub trait StoreNamespace: Send + Sync + 'static {
    type State: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;
    type Action: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Name des Stores für Logs
    const IDENTIFIER: &'static str;
}

/// Reine State-Transformation
///
/// Ein Fehler bricht die Reduktion der Action ab, der State bleibt unverändert.
pub trait Reducer<N: StoreNamespace>: Send + Sync {
    fn reduce(&self, state: N::State, action: &N::Action) -> Result<N::State, StoreError>;
}

/// Beobachter von (State, Action) vor der Reduktion
///
/// Darf Seiteneffekte auslösen und über den Dispatcher Folge-Actions
/// einreihen, aber niemals den State direkt verändern. Fehler werden
/// geloggt und brechen die Pipeline nicht ab.
///
/// `dispatch_sync` darf hier nicht aufgerufen werden: die Middleware läuft
/// auf der Queue, auf deren Abschluss sie warten würde.
pub trait Middleware<N: StoreNamespace>: Send + Sync {
    fn apply(
        &self,
        state: &N::State,
        action: &N::Action,
        dispatcher: &Dispatcher<N>,
    ) -> anyhow::Result<()>;
}

/// Ein Schritt einer dispatchten Sequenz
#[derive(Debug, Clone, PartialEq)]
pub enum Step<A> {
    Action(A),
    /// Nicht-blockierende Pause auf der Queue des Stores
    Delay(Duration),
}

impl<A> From<A> for Step<A> {
    fn from(action: A) -> Self {
        Step::Action(action)
    }
}

// ============================================================================
// SHARED STATE
// ============================================================================

struct Job<N: StoreNamespace> {
    steps: Vec<Step<N::Action>>,
    cancel: CancellationToken,
    completion: Option<oneshot::Sender<Result<N::State, StoreError>>>,
}

struct Shared<N: StoreNamespace> {
    state: RwLock<N::State>,
    observers: Mutex<Vec<mpsc::UnboundedSender<N::State>>>,
    log: Mutex<Option<ActionLog<N::Action>>>,
}

impl<N: StoreNamespace> Shared<N> {
    /// Setzt den neuen State und verteilt ihn an alle Beobachter.
    ///
    /// Der Observer-Lock wird über beide Schritte gehalten, damit ein
    /// gleichzeitiger `subscribe` keinen Wert doppelt oder gar nicht sieht.
    fn publish(&self, updated: N::State) {
        let mut observers = self.observers.lock();
        *self.state.write() = updated.clone();
        observers.retain(|tx| tx.send(updated.clone()).is_ok());
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Handle zum Einreihen von Actions und zum Beobachten des States
///
/// Kann beliebig geklont und aus jedem Kontext verwendet werden; der Store
/// ist der Synchronisationspunkt.
pub struct Dispatcher<N: StoreNamespace> {
    jobs: mpsc::UnboundedSender<Job<N>>,
    shared: Arc<Shared<N>>,
    shutdown: CancellationToken,
}

impl<N: StoreNamespace> Clone for Dispatcher<N> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            shared: Arc::clone(&self.shared),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<N: StoreNamespace> Dispatcher<N> {
    /// Gibt einen Snapshot des aktuellen States zurück
    pub fn state(&self) -> N::State {
        self.shared.state.read().clone()
    }

    /// Prüft ob der Store geschlossen wurde
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Reiht eine Action ein und kehrt sofort zurück
    pub fn dispatch(&self, action: N::Action) {
        self.dispatch_sequence(vec![Step::Action(action)]);
    }

    /// Reiht eine Sequenz als einen Job ein
    ///
    /// Das zurückgegebene Token bricht die restlichen Schritte ab.
    pub fn dispatch_sequence(&self, steps: Vec<Step<N::Action>>) -> CancellationToken {
        let cancel = self.shutdown.child_token();
        self.dispatch_sequence_with(steps, cancel.clone());
        cancel
    }

    /// Reiht eine Sequenz mit einem vom Aufrufer verwalteten Token ein
    pub fn dispatch_sequence_with(&self, steps: Vec<Step<N::Action>>, cancel: CancellationToken) {
        if let Err(e) = self.enqueue(steps, cancel, None) {
            tracing::warn!("[{}] Dropped dispatch: {}", N::IDENTIFIER, e);
        }
    }

    /// Dispatcht eine Action und wartet auf das Ergebnis der Reduktion
    pub async fn dispatch_sync(&self, action: N::Action) -> Result<N::State, StoreError> {
        self.dispatch_sequence_sync(vec![Step::Action(action)]).await
    }

    /// Dispatcht eine Sequenz und wartet bis alle Schritte verarbeitet sind
    pub async fn dispatch_sequence_sync(
        &self,
        steps: Vec<Step<N::Action>>,
    ) -> Result<N::State, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(steps, self.shutdown.child_token(), Some(tx))?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Stream aller States: zuerst der aktuelle, dann jede Änderung in
    /// Reihenfolge
    pub fn subscribe(&self) -> BoxStream<'static, N::State> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut observers = self.shared.observers.lock();
            let current = self.shared.state.read().clone();
            if tx.send(current).is_ok() && !self.shutdown.is_cancelled() {
                observers.push(tx);
            }
        }

        stream::unfold(rx, |mut rx| async move {
            let state = rx.recv().await?;
            Some((state, rx))
        })
        .boxed()
    }

    /// Stream einer Projektion des States, nur bei tatsächlicher Änderung
    pub fn observe<V, F>(&self, selector: F) -> BoxStream<'static, V>
    where
        V: PartialEq + Clone + Send + 'static,
        F: Fn(&N::State) -> V + Send + Sync + 'static,
    {
        let selector = Arc::new(selector);
        self.subscribe()
            .filter_map({
                let mut last: Option<V> = None;
                move |state| {
                    let value = selector(&state);
                    let changed = last.as_ref() != Some(&value);
                    if changed {
                        last = Some(value.clone());
                    }
                    futures::future::ready(changed.then_some(value))
                }
            })
            .boxed()
    }

    /// Wartet auf den nächsten Wert einer Projektion, der das Prädikat erfüllt
    ///
    /// Liefert `StoreError::Timeout`, wenn innerhalb der Frist nichts passt.
    pub async fn next_value<V, F, P>(
        &self,
        selector: F,
        predicate: P,
        timeout: Duration,
    ) -> Result<V, StoreError>
    where
        V: PartialEq + Clone + Send + 'static,
        F: Fn(&N::State) -> V + Send + Sync + 'static,
        P: Fn(&V) -> bool,
    {
        let mut values = self.observe(selector);
        let wait = async {
            while let Some(value) = values.next().await {
                if predicate(&value) {
                    return Ok(value);
                }
            }
            Err(StoreError::Closed)
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
    }

    fn enqueue(
        &self,
        steps: Vec<Step<N::Action>>,
        cancel: CancellationToken,
        completion: Option<oneshot::Sender<Result<N::State, StoreError>>>,
    ) -> Result<(), StoreError> {
        if self.shutdown.is_cancelled() {
            return Err(StoreError::Closed);
        }

        self.jobs
            .send(Job {
                steps,
                cancel,
                completion,
            })
            .map_err(|_| StoreError::Closed)
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Besitzender Handle eines Stores
///
/// Beim Drop wird der Worker beendet und jede laufende Sequenz abgebrochen.
pub struct Store<N: StoreNamespace> {
    dispatcher: Dispatcher<N>,
}

impl<N: StoreNamespace> Store<N> {
    /// Startet einen Builder mit dem Anfangs-State
    pub fn builder(initial_state: N::State) -> StoreBuilder<N> {
        StoreBuilder {
            initial_state,
            reducers: Vec::new(),
            middleware: Vec::new(),
            record_actions: false,
        }
    }

    /// Gibt einen klonbaren Dispatcher zurück
    pub fn dispatcher(&self) -> Dispatcher<N> {
        self.dispatcher.clone()
    }

    /// Kopie des bisherigen Action-Logs (falls aktiviert)
    pub fn action_log(&self) -> Option<ActionLog<N::Action>> {
        self.dispatcher.shared.log.lock().clone()
    }

    /// Beendet den Store; spätere Dispatches werden verworfen
    pub fn close(&self) {
        if !self.dispatcher.shutdown.is_cancelled() {
            tracing::debug!("[{}] Closing store", N::IDENTIFIER);
            self.dispatcher.shutdown.cancel();
        }
    }
}

impl<N: StoreNamespace> std::ops::Deref for Store<N> {
    type Target = Dispatcher<N>;

    fn deref(&self) -> &Self::Target {
        &self.dispatcher
    }
}

impl<N: StoreNamespace> Drop for Store<N> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<N: StoreNamespace> fmt::Debug for Store<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("identifier", &N::IDENTIFIER)
            .field("state", &self.dispatcher.state())
            .field("closed", &self.dispatcher.is_closed())
            .finish()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct StoreBuilder<N: StoreNamespace> {
    initial_state: N::State,
    reducers: Vec<Arc<dyn Reducer<N>>>,
    middleware: Vec<Arc<dyn Middleware<N>>>,
    record_actions: bool,
}

impl<N: StoreNamespace> StoreBuilder<N> {
    /// Registriert einen Reducer (Reihenfolge = Ausführungsreihenfolge)
    pub fn reducer(mut self, reducer: impl Reducer<N> + 'static) -> Self {
        self.reducers.push(Arc::new(reducer));
        self
    }

    /// Registriert eine Middleware (Reihenfolge = Ausführungsreihenfolge)
    pub fn middleware(mut self, middleware: impl Middleware<N> + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Registriert eine bereits geteilte Middleware
    pub fn shared_middleware(mut self, middleware: Arc<dyn Middleware<N>>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Zeichnet jede erfolgreich reduzierte Action auf
    pub fn with_action_log(mut self) -> Self {
        self.record_actions = true;
        self
    }

    /// Erstellt den Store und startet seinen Worker
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn build(self) -> Store<N> {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            state: RwLock::new(self.initial_state),
            observers: Mutex::new(Vec::new()),
            log: Mutex::new(
                self.record_actions
                    .then(|| ActionLog::new(N::IDENTIFIER)),
            ),
        });

        let dispatcher = Dispatcher {
            jobs: jobs_tx,
            shared,
            shutdown: CancellationToken::new(),
        };

        let worker = Worker {
            dispatcher: dispatcher.clone(),
            reducers: self.reducers,
            middleware: self.middleware,
        };
        tokio::spawn(worker.run(jobs_rx));

        tracing::debug!("[{}] Store started", N::IDENTIFIER);
        Store { dispatcher }
    }
}

// ============================================================================
// WORKER
// ============================================================================

struct Worker<N: StoreNamespace> {
    dispatcher: Dispatcher<N>,
    reducers: Vec<Arc<dyn Reducer<N>>>,
    middleware: Vec<Arc<dyn Middleware<N>>>,
}

impl<N: StoreNamespace> Worker<N> {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job<N>>) {
        let shutdown = self.dispatcher.shutdown.clone();

        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let result = self.execute(job.steps, &job.cancel).await;
            if let Some(completion) = job.completion {
                let _ = completion.send(result);
            }
        }

        // Wartende Aufrufer nicht hängen lassen
        jobs.close();
        while let Ok(job) = jobs.try_recv() {
            if let Some(completion) = job.completion {
                let _ = completion.send(Err(StoreError::Closed));
            }
        }
        self.dispatcher.shared.observers.lock().clear();

        tracing::debug!("[{}] Store stopped", N::IDENTIFIER);
    }

    async fn execute(
        &self,
        steps: Vec<Step<N::Action>>,
        cancel: &CancellationToken,
    ) -> Result<N::State, StoreError> {
        let shutdown = &self.dispatcher.shutdown;

        for step in steps {
            if cancel.is_cancelled() || shutdown.is_cancelled() {
                tracing::debug!("[{}] Sequence cancelled", N::IDENTIFIER);
                return Err(StoreError::Cancelled);
            }

            match step {
                Step::Delay(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                        _ = shutdown.cancelled() => return Err(StoreError::Cancelled),
                    }
                }
                Step::Action(action) => self.perform(action)?,
            }
        }

        Ok(self.dispatcher.state())
    }

    fn perform(&self, action: N::Action) -> Result<(), StoreError> {
        let state = self.dispatcher.state();

        for middleware in &self.middleware {
            if let Err(e) = middleware.apply(&state, &action, &self.dispatcher) {
                tracing::error!(
                    "[{}] Middleware failed for {:?}: {:#}",
                    N::IDENTIFIER,
                    action,
                    e
                );
            }
        }

        let result = self
            .reducers
            .iter()
            .try_fold(state.clone(), |current, reducer| {
                reducer.reduce(current, &action)
            });

        match result {
            Ok(updated) => {
                if let Some(log) = self.dispatcher.shared.log.lock().as_mut() {
                    log.record(action.clone());
                }
                if updated != state {
                    self.dispatcher.shared.publish(updated);
                }
                tracing::debug!("[{}] Completed action: {:?}", N::IDENTIFIER, action);
                Ok(())
            }
            Err(StoreError::InvalidTransition(reason)) => {
                tracing::warn!(
                    "[{}] Dropped action {:?}: {}",
                    N::IDENTIFIER,
                    action,
                    reason
                );
                Err(StoreError::InvalidTransition(reason))
            }
            Err(e) => {
                tracing::error!("[{}] Failed action {:?}: {}", N::IDENTIFIER, action, e);
                Err(e)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct CounterState {
        value: i64,
        history: Vec<i64>,
        label: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum CounterAction {
        Add(i64),
        Label(String),
        Echo(i64),
        Fail,
        Reject,
    }

    impl StoreNamespace for Counter {
        type State = CounterState;
        type Action = CounterAction;
        const IDENTIFIER: &'static str = "counter";
    }

    struct AddReducer;

    impl Reducer<Counter> for AddReducer {
        fn reduce(
            &self,
            mut state: CounterState,
            action: &CounterAction,
        ) -> Result<CounterState, StoreError> {
            match action {
                CounterAction::Add(n) => state.value += n,
                CounterAction::Label(label) => state.label = label.clone(),
                CounterAction::Fail => return Err(StoreError::ReducerFailed("boom".into())),
                CounterAction::Reject => {
                    return Err(StoreError::InvalidTransition("not allowed".into()))
                }
                CounterAction::Echo(_) => {}
            }
            Ok(state)
        }
    }

    /// Läuft nach dem AddReducer und sieht daher schon den neuen Wert
    struct HistoryReducer;

    impl Reducer<Counter> for HistoryReducer {
        fn reduce(
            &self,
            mut state: CounterState,
            action: &CounterAction,
        ) -> Result<CounterState, StoreError> {
            if let CounterAction::Add(_) = action {
                state.history.push(state.value);
            }
            Ok(state)
        }
    }

    struct EchoMiddleware;

    impl Middleware<Counter> for EchoMiddleware {
        fn apply(
            &self,
            _state: &CounterState,
            action: &CounterAction,
            dispatcher: &Dispatcher<Counter>,
        ) -> anyhow::Result<()> {
            if let CounterAction::Echo(n) = action {
                dispatcher.dispatch(CounterAction::Add(*n));
            }
            Ok(())
        }
    }

    struct FailingMiddleware(Arc<AtomicUsize>);

    impl Middleware<Counter> for FailingMiddleware {
        fn apply(
            &self,
            _state: &CounterState,
            _action: &CounterAction,
            _dispatcher: &Dispatcher<Counter>,
        ) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("middleware exploded")
        }
    }

    fn counter_store() -> Store<Counter> {
        Store::builder(CounterState::default())
            .reducer(AddReducer)
            .reducer(HistoryReducer)
            .middleware(EchoMiddleware)
            .build()
    }

    #[tokio::test]
    async fn test_reducers_run_in_registration_order() {
        let store = counter_store();

        store.dispatch_sync(CounterAction::Add(2)).await.unwrap();
        let state = store.dispatch_sync(CounterAction::Add(3)).await.unwrap();

        assert_eq!(state.value, 5);
        assert_eq!(state.history, vec![2, 5]);
    }

    #[tokio::test]
    async fn test_reducer_error_leaves_state_unchanged() {
        let store = counter_store();
        store.dispatch_sync(CounterAction::Add(1)).await.unwrap();

        let result = store.dispatch_sync(CounterAction::Fail).await;
        assert_eq!(result, Err(StoreError::ReducerFailed("boom".into())));

        let result = store.dispatch_sync(CounterAction::Reject).await;
        assert!(matches!(result, Err(StoreError::InvalidTransition(_))));

        assert_eq!(store.state().value, 1);
    }

    #[tokio::test]
    async fn test_middleware_follow_up_runs_after_current_action() {
        let store = counter_store();

        store.dispatch_sync(CounterAction::Echo(4)).await.unwrap();
        // Folge-Action liegt hinter der Echo-Action in der Queue
        let state = store.dispatch_sync(CounterAction::Add(1)).await.unwrap();

        assert_eq!(state.history, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_middleware_error_does_not_abort_pipeline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Store::<Counter>::builder(CounterState::default())
            .middleware(FailingMiddleware(Arc::clone(&calls)))
            .reducer(AddReducer)
            .build();

        let state = store.dispatch_sync(CounterAction::Add(7)).await.unwrap();

        assert_eq!(state.value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequences_from_concurrent_producers_keep_their_order() {
        let store = counter_store();
        let mut handles = Vec::new();

        for producer in 1..=4i64 {
            let dispatcher = store.dispatcher();
            handles.push(tokio::spawn(async move {
                for i in 0..10i64 {
                    dispatcher.dispatch(CounterAction::Add(producer * 100 + i));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let state = store.dispatch_sync(CounterAction::Add(0)).await.unwrap();
        assert_eq!(state.history.len(), 41);

        // Die Deltas der History sind genau die addierten Werte
        let deltas: Vec<i64> = std::iter::once(state.history[0])
            .chain(state.history.windows(2).map(|w| w[1] - w[0]))
            .collect();
        for producer in 1..=4i64 {
            let own: Vec<i64> = deltas
                .iter()
                .copied()
                .filter(|d| *d / 100 == producer)
                .collect();
            let expected: Vec<i64> = (0..10).map(|i| producer * 100 + i).collect();
            assert_eq!(own, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_step_postpones_following_actions() {
        let store = counter_store();

        store.dispatch_sequence(vec![
            Step::Action(CounterAction::Add(1)),
            Step::Delay(Duration::from_millis(200)),
            Step::Action(CounterAction::Add(1)),
        ]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.state().value, 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.state().value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sequence_stops_side_effects() {
        let store = counter_store();

        let token = store.dispatch_sequence(vec![
            Step::Action(CounterAction::Add(1)),
            Step::Delay(Duration::from_millis(200)),
            Step::Action(CounterAction::Add(10)),
        ]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Bereits angewendete Schritte bleiben bestehen
        assert_eq!(store.state().value, 1);
    }

    #[tokio::test]
    async fn test_sequence_aborts_after_reducer_error() {
        let store = counter_store();

        let result = store
            .dispatch_sequence_sync(vec![
                Step::Action(CounterAction::Add(1)),
                Step::Action(CounterAction::Fail),
                Step::Action(CounterAction::Add(1)),
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(store.state().value, 1);
    }

    #[tokio::test]
    async fn test_subscribe_sees_every_distinct_state_in_order() {
        let store = counter_store();
        let mut states = store.subscribe();

        for n in 1..=3 {
            store.dispatch(CounterAction::Add(n));
        }
        store.dispatch_sync(CounterAction::Add(0)).await.unwrap();

        let mut values = Vec::new();
        for _ in 0..5 {
            values.push(states.next().await.unwrap().value);
        }
        // Add(0) ändert den Wert nicht, erzeugt aber neue History
        assert_eq!(values, vec![0, 1, 3, 6, 6]);
    }

    #[tokio::test]
    async fn test_observe_deduplicates_projection() {
        let store = counter_store();
        let mut labels = store.observe(|s: &CounterState| s.label.clone());

        store.dispatch(CounterAction::Label("a".into()));
        store.dispatch(CounterAction::Add(1));
        store.dispatch(CounterAction::Label("a".into()));
        store.dispatch_sync(CounterAction::Label("b".into())).await.unwrap();

        assert_eq!(labels.next().await.unwrap(), "");
        assert_eq!(labels.next().await.unwrap(), "a");
        assert_eq!(labels.next().await.unwrap(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_value_times_out_distinctly() {
        let store = counter_store();

        let result = store
            .next_value(|s: &CounterState| s.value, |v| *v > 10, Duration::from_secs(1))
            .await;
        assert_eq!(result, Err(StoreError::Timeout(Duration::from_secs(1))));

        store.dispatch(CounterAction::Add(11));
        let value = store
            .next_value(|s: &CounterState| s.value, |v| *v > 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(value, 11);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_dispatch() {
        let store = counter_store();
        store.close();

        let result = store.dispatch_sync(CounterAction::Add(1)).await;
        assert_eq!(result, Err(StoreError::Closed));
    }

    #[tokio::test]
    async fn test_action_log_records_only_reduced_actions() {
        let store = Store::<Counter>::builder(CounterState::default())
            .reducer(AddReducer)
            .with_action_log()
            .build();

        store.dispatch_sync(CounterAction::Add(1)).await.unwrap();
        let _ = store.dispatch_sync(CounterAction::Fail).await;
        store.dispatch_sync(CounterAction::Add(2)).await.unwrap();

        let log = store.action_log().unwrap();
        let actions: Vec<_> = log.records().iter().map(|r| r.action.clone()).collect();
        assert_eq!(actions, vec![CounterAction::Add(1), CounterAction::Add(2)]);
    }
}
