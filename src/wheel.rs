use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[cfg(feature = "logging")]
use log::{debug, trace};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

use crate::config::WheelConfig;
use crate::errors::TimerError;
use crate::fault::{FaultSink, LogFaultSink};
use crate::slot::Slot;
use crate::task::{ErrorHandler, Task, TaskCallback, TaskId};

/// Represents the lifecycle of a wheel's driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelState {
    /// Constructed, driver not started yet.
    Idle,
    Running,
    /// Stopped for good; pending tasks are abandoned.
    Stopped,
}

/// Statistics for a wheel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WheelStatistics {
    /// Number of ticks performed.
    pub ticks: u64,
    /// Number of callbacks executed, failed ones included.
    pub fired: u64,
    /// Number of callbacks that returned an error or panicked.
    pub failed: u64,
    /// Number of successful cancellations.
    pub canceled: u64,
    /// Number of canceled tasks the driver has swept out of their slots.
    pub discarded: u64,
    /// Tasks currently waiting to fire.
    pub pending: usize,
}

/// Slot storage and counters, guarded by a single lock.
struct Core {
    slots: Vec<Slot>,
    /// Slot index of every task that can still be canceled.
    index: HashMap<TaskId, usize>,
    cursor: usize,
    revolution: u64,
    next_id: u64,
    state: WheelState,
    statistics: WheelStatistics,
}

impl Core {
    fn new(slot_count: usize) -> Self {
        Core {
            slots: (0..slot_count).map(Slot::new).collect(),
            index: HashMap::new(),
            cursor: 0,
            revolution: 0,
            next_id: 0,
            state: WheelState::Idle,
            statistics: WheelStatistics::default(),
        }
    }

    /// Places a task `ticks` ticks ahead of the cursor.
    fn insert(
        &mut self,
        ticks: u128,
        callback: Arc<dyn TaskCallback>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
    ) -> Result<(TaskId, usize, u64), TimerError> {
        let slot_count = self.slots.len() as u128;
        let target = u128::from(self.revolution) * slot_count + self.cursor as u128 + ticks;
        let target_revolution = u64::try_from(target / slot_count).map_err(|_| {
            TimerError::InvalidArgument("Delay exceeds the range of the wheel.".into())
        })?;
        let target_slot = (target % slot_count) as usize;

        let id = TaskId::new(self.next_id);
        self.next_id += 1;
        self.slots[target_slot].push(Task::new(id, target_revolution, callback, error_handler));
        self.index.insert(id, target_slot);
        Ok((id, target_slot, target_revolution))
    }

    fn cancel(&mut self, id: TaskId) -> bool {
        let Some(slot) = self.index.remove(&id) else {
            return false;
        };
        let canceled = self.slots[slot].cancel(id);
        if canceled {
            self.statistics.canceled += 1;
        }
        canceled
    }

    /// Sweeps the slot under the cursor and moves the cursor on.
    ///
    /// Due tasks are handed back to the caller and are no longer cancelable.
    fn advance(&mut self) -> Vec<Task> {
        let sweep = self.slots[self.cursor].sweep(self.revolution);
        for task in &sweep.due {
            self.index.remove(&task.id);
        }

        #[cfg(feature = "logging")]
        trace!(
            "Tick at slot {} revolution {}: {} due, {} discarded.",
            self.slots[self.cursor].index(),
            self.revolution,
            sweep.due.len(),
            sweep.discarded.len()
        );

        self.statistics.ticks += 1;
        self.statistics.discarded += sweep.discarded.len() as u64;
        self.cursor = (self.cursor + 1) % self.slots.len();
        if self.cursor == 0 {
            self.revolution += 1;
        }
        sweep.due
    }
}

/// State shared between the wheel handle and its driver.
struct Shared {
    config: WheelConfig,
    core: Mutex<Core>,
    stop_notify: Notify,
    fault_sink: Arc<dyn FaultSink>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn tick(&self) -> usize {
        let due = {
            let mut core = self.lock();
            if core.state == WheelState::Stopped {
                return 0;
            }
            core.advance()
        };

        let count = due.len();
        for task in due {
            self.execute(task).await;
        }
        count
    }

    async fn execute(&self, task: Task) {
        let Task {
            id,
            callback,
            error_handler,
            ..
        } = task;

        // Running the callback in its own task contains panics.
        let outcome = match tokio::spawn(async move { callback.execute().await }).await {
            Ok(result) => result,
            Err(join_error) => Err(TimerError::CallbackPanicked(join_failure(join_error))),
        };

        {
            let mut core = self.lock();
            core.statistics.fired += 1;
            if outcome.is_err() {
                core.statistics.failed += 1;
            }
        }

        if let Err(error) = outcome {
            self.route_failure(id, error, error_handler);
        }
    }

    fn route_failure(
        &self,
        id: TaskId,
        error: TimerError,
        error_handler: Option<Arc<dyn ErrorHandler>>,
    ) {
        let unhandled = match error_handler {
            Some(handler) => {
                match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&error, id))) {
                    Ok(()) => None,
                    Err(payload) => Some(TimerError::CallbackPanicked(format!(
                        "error handler panicked: {}",
                        panic_message(&*payload)
                    ))),
                }
            }
            None => Some(error),
        };

        if let Some(error) = unhandled {
            // Panics raised by the sink itself are dropped.
            let _ = panic::catch_unwind(AssertUnwindSafe(|| self.fault_sink.report(id, &error)));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn join_failure(join_error: JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => panic_message(&*payload),
        Err(_) => "callback was cancelled by the runtime".to_string(),
    }
}

/// A single-level timing wheel executing one-shot callbacks after a delay.
///
/// Delays are quantized to whole slot intervals, rounding down: a task
/// scheduled with delay `d` fires on the `floor(d / slot_interval)`-th tick
/// after the call, so it runs no earlier than `floor(d / slot_interval)`
/// intervals and no later than one interval after that. A delay shorter than
/// one interval fires on the next tick.
///
/// Callbacks run one after another on the driver. A slow callback delays the
/// ticks behind it and a callback that never completes stalls the wheel;
/// no timeout is applied.
pub struct TimingWheel {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl TimingWheel {
    /// Creates a wheel with `slot_count` slots, each covering `slot_interval`.
    pub fn new(slot_count: usize, slot_interval: Duration) -> Result<Self, TimerError> {
        Self::with_config(WheelConfig::new(slot_count, slot_interval))
    }

    /// Creates a wheel reporting unhandled failures through [`LogFaultSink`].
    pub fn with_config(config: WheelConfig) -> Result<Self, TimerError> {
        Self::with_fault_sink(config, LogFaultSink)
    }

    /// Creates a wheel reporting unhandled failures to `fault_sink`.
    pub fn with_fault_sink<S>(config: WheelConfig, fault_sink: S) -> Result<Self, TimerError>
    where
        S: FaultSink + 'static,
    {
        config.validate()?;
        Ok(TimingWheel {
            shared: Arc::new(Shared {
                config,
                core: Mutex::new(Core::new(config.slot_count)),
                stop_notify: Notify::new(),
                fault_sink: Arc::new(fault_sink),
            }),
            driver: Mutex::new(None),
        })
    }

    /// Schedules `callback` to run once after `delay`.
    pub fn schedule<C>(&self, delay: Duration, callback: C) -> Result<TaskId, TimerError>
    where
        C: TaskCallback + 'static,
    {
        self.schedule_internal(delay, Arc::new(callback), None)
    }

    /// Schedules `callback` to run once after `delay`, routing its failure to
    /// `error_handler`.
    pub fn schedule_with_handler<C, H>(
        &self,
        delay: Duration,
        callback: C,
        error_handler: H,
    ) -> Result<TaskId, TimerError>
    where
        C: TaskCallback + 'static,
        H: ErrorHandler + 'static,
    {
        self.schedule_internal(delay, Arc::new(callback), Some(Arc::new(error_handler)))
    }

    /// Cancels a pending task.
    ///
    /// Returns `false` if the task is unknown, already canceled, or already
    /// taken by the driver for execution.
    pub fn cancel(&self, id: TaskId) -> bool {
        let canceled = self.shared.lock().cancel(id);

        if canceled {
            #[cfg(feature = "logging")]
            debug!("Canceled {}.", id);
        }

        canceled
    }

    /// Starts the driver on the current tokio runtime.
    ///
    /// Starting a running wheel does nothing. A stopped wheel cannot be
    /// restarted.
    pub fn start(&self) -> Result<(), TimerError> {
        let runtime = Handle::try_current().map_err(|_| TimerError::NoRuntime)?;
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);

        {
            let mut core = self.shared.lock();
            match core.state {
                WheelState::Running => return Ok(()),
                WheelState::Stopped => return Err(TimerError::WheelStopped),
                WheelState::Idle => core.state = WheelState::Running,
            }
        }

        #[cfg(feature = "logging")]
        debug!(
            "Starting wheel with {} slots of {:?}.",
            self.shared.config.slot_count, self.shared.config.slot_interval
        );

        let shared = Arc::clone(&self.shared);
        *driver = Some(runtime.spawn(async move {
            let mut ticker = time::interval(shared.config.slot_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shared.stop_notify.notified() => break,
                    _ = ticker.tick() => {}
                }

                let stopped = shared.lock().state == WheelState::Stopped;
                if stopped {
                    break;
                }
                shared.tick().await;
            }

            #[cfg(feature = "logging")]
            debug!("Wheel driver exited.");
        }));

        Ok(())
    }

    /// Stops the driver. Pending tasks are abandoned. Calling this again has
    /// no effect.
    pub fn stop(&self) {
        let was_running = {
            let mut core = self.shared.lock();
            let previous = core.state;
            core.state = WheelState::Stopped;
            previous == WheelState::Running
        };

        if was_running {
            self.shared.stop_notify.notify_one();
            #[cfg(feature = "logging")]
            debug!("Stopping wheel.");
        }
    }

    /// Stops the driver and waits for it to exit, letting a tick already in
    /// progress finish its callbacks.
    ///
    /// Must not be awaited from inside one of this wheel's callbacks.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Performs a single tick by hand and returns how many callbacks ran.
    ///
    /// Meant for wheels whose driver is not started, such as wheels clocked
    /// by an external loop. Does nothing once the wheel is stopped.
    pub async fn tick(&self) -> usize {
        self.shared.tick().await
    }

    /// Gets the wheel's statistics.
    pub fn statistics(&self) -> WheelStatistics {
        let core = self.shared.lock();
        WheelStatistics {
            pending: core.index.len(),
            ..core.statistics.clone()
        }
    }

    /// Gets the current lifecycle state of the wheel.
    pub fn state(&self) -> WheelState {
        self.shared.lock().state
    }

    /// Number of tasks waiting to fire.
    pub fn pending(&self) -> usize {
        self.shared.lock().index.len()
    }

    /// Whether `id` is still waiting to fire and can be canceled.
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.shared.lock().index.contains_key(&id)
    }

    /// Index of the slot the next tick will sweep.
    pub fn cursor(&self) -> usize {
        self.shared.lock().cursor
    }

    /// Number of completed sweeps.
    pub fn revolution(&self) -> u64 {
        self.shared.lock().revolution
    }

    pub fn config(&self) -> WheelConfig {
        self.shared.config
    }

    pub fn slot_count(&self) -> usize {
        self.shared.config.slot_count
    }

    pub fn slot_interval(&self) -> Duration {
        self.shared.config.slot_interval
    }

    pub fn round_duration(&self) -> Duration {
        self.shared.config.round_duration()
    }

    fn schedule_internal(
        &self,
        delay: Duration,
        callback: Arc<dyn TaskCallback>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
    ) -> Result<TaskId, TimerError> {
        if delay.is_zero() {
            return Err(TimerError::InvalidArgument(
                "Delay must be greater than zero.".into(),
            ));
        }

        let ticks = self.shared.config.ticks_for(delay);
        let mut core = self.shared.lock();
        if core.state == WheelState::Stopped {
            return Err(TimerError::WheelStopped);
        }

        #[cfg(feature = "logging")]
        let (cursor, revolution) = (core.cursor, core.revolution);
        #[allow(unused_variables)]
        let (id, slot, target_revolution) = core.insert(ticks, callback, error_handler)?;
        drop(core);

        #[cfg(feature = "logging")]
        debug!(
            "Scheduled {} after {:?} into slot {} at revolution {} (cursor {}, revolution {}).",
            id, delay, slot, target_revolution, cursor, revolution
        );

        Ok(id)
    }
}

impl Drop for TimingWheel {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Result<(), TimerError> + Send + Sync) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        (count, move || {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn failing() -> Result<(), TimerError> {
        Err(TimerError::CallbackError("Simulated error!".into()))
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(matches!(
            TimingWheel::new(0, Duration::from_secs(1)),
            Err(TimerError::Configuration(_))
        ));
        assert!(matches!(
            TimingWheel::new(10, Duration::ZERO),
            Err(TimerError::Configuration(_))
        ));
    }

    #[test]
    fn fresh_wheel_is_idle_at_origin() {
        let wheel = TimingWheel::new(10, Duration::from_secs(1)).unwrap();
        assert_eq!(wheel.state(), WheelState::Idle);
        assert_eq!(wheel.cursor(), 0);
        assert_eq!(wheel.revolution(), 0);
        assert_eq!(wheel.round_duration(), Duration::from_secs(10));
        assert_eq!(wheel.statistics(), WheelStatistics::default());
    }

    #[test]
    fn zero_delay_is_rejected() {
        let wheel = TimingWheel::new(10, Duration::from_secs(1)).unwrap();
        let (_, callback) = counter();
        assert!(matches!(
            wheel.schedule(Duration::ZERO, callback),
            Err(TimerError::InvalidArgument(_))
        ));
        assert_eq!(wheel.pending(), 0);
    }

    #[test]
    fn start_requires_runtime() {
        let wheel = TimingWheel::new(10, Duration::from_secs(1)).unwrap();
        assert_eq!(wheel.start(), Err(TimerError::NoRuntime));
        assert_eq!(wheel.state(), WheelState::Idle);
    }

    #[tokio::test]
    async fn two_second_delay_fires_at_tick_two() {
        let wheel = TimingWheel::new(10, Duration::from_secs(1)).unwrap();
        let (count, callback) = counter();
        wheel.schedule(Duration::from_secs(2), callback).unwrap();

        assert_eq!(wheel.tick().await, 0);
        assert_eq!(wheel.tick().await, 0);
        assert_eq!(wheel.tick().await, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.pending(), 0);
    }

    #[tokio::test]
    async fn delay_beyond_one_round_waits_for_its_revolution() {
        let wheel = TimingWheel::new(10, Duration::from_secs(1)).unwrap();
        let (count, callback) = counter();
        wheel.schedule(Duration::from_secs(11), callback).unwrap();

        for _ in 0..11 {
            wheel.tick().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(wheel.revolution(), 1);
        assert_eq!(wheel.cursor(), 1);

        wheel.tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delay_wrapping_past_slot_zero_keeps_its_tick_count() {
        let wheel = TimingWheel::new(10, Duration::from_secs(1)).unwrap();
        for _ in 0..8 {
            wheel.tick().await;
        }
        let (count, callback) = counter();
        wheel.schedule(Duration::from_secs(3), callback).unwrap();

        for _ in 0..3 {
            wheel.tick().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        wheel.tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sub_interval_delay_fires_on_next_tick() {
        let wheel = TimingWheel::new(10, Duration::from_secs(1)).unwrap();
        wheel.tick().await;
        let (count, callback) = counter();
        wheel.schedule(Duration::from_millis(300), callback).unwrap();

        wheel.tick().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn canceled_task_never_runs() {
        let wheel = TimingWheel::new(4, Duration::from_secs(1)).unwrap();
        let (count, callback) = counter();
        let id = wheel.schedule(Duration::from_secs(2), callback).unwrap();

        assert!(wheel.is_pending(id));
        assert!(wheel.cancel(id));
        assert!(!wheel.cancel(id));
        assert!(!wheel.is_pending(id));

        for _ in 0..8 {
            wheel.tick().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let stats = wheel.statistics();
        assert_eq!(stats.canceled, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.fired, 0);
    }

    #[tokio::test]
    async fn fired_task_cannot_be_canceled() {
        let wheel = TimingWheel::new(4, Duration::from_secs(1)).unwrap();
        let (_, callback) = counter();
        let id = wheel.schedule(Duration::from_secs(1), callback).unwrap();
        wheel.tick().await;
        wheel.tick().await;
        assert!(!wheel.cancel(id));
    }

    #[tokio::test]
    async fn handler_receives_failure_and_task_id() {
        let wheel = TimingWheel::new(4, Duration::from_secs(1)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = wheel
            .schedule_with_handler(
                Duration::from_secs(1),
                failing,
                move |error: &TimerError, task: TaskId| {
                    sink.lock().unwrap().push((task, error.clone()));
                },
            )
            .unwrap();
        let (count, callback) = counter();
        wheel.schedule(Duration::from_secs(1), callback).unwrap();

        wheel.tick().await;
        wheel.tick().await;

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(id, TimerError::CallbackError("Simulated error!".into()))]
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let stats = wheel.statistics();
        assert_eq!(stats.fired, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn unhandled_failures_reach_the_fault_sink() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let wheel = TimingWheel::with_fault_sink(
            WheelConfig::new(4, Duration::from_secs(1)),
            move |task: TaskId, error: &TimerError| {
                sink.lock().unwrap().push((task, error.clone()));
            },
        )
        .unwrap();

        let failed = wheel.schedule(Duration::from_secs(1), failing).unwrap();
        let panicked = wheel
            .schedule(Duration::from_secs(1), || -> Result<(), TimerError> {
                panic!("callback exploded")
            })
            .unwrap();
        let (count, callback) = counter();
        wheel.schedule(Duration::from_secs(2), callback).unwrap();

        for _ in 0..3 {
            wheel.tick().await;
        }

        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0].0, failed);
        assert_eq!(reported[1].0, panicked);
        assert_eq!(
            reported[1].1,
            TimerError::CallbackPanicked("callback exploded".into())
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_to_sink() {
        let reported = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&reported);
        let wheel = TimingWheel::with_fault_sink(
            WheelConfig::new(4, Duration::from_secs(1)),
            move |_: TaskId, _: &TimerError| {
                sink.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        wheel
            .schedule_with_handler(
                Duration::from_secs(1),
                failing,
                |_: &TimerError, _: TaskId| panic!("handler exploded"),
            )
            .unwrap();
        wheel.tick().await;
        wheel.tick().await;

        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_final() {
        let wheel = TimingWheel::new(4, Duration::from_secs(1)).unwrap();
        wheel.start().unwrap();
        wheel.start().unwrap();
        assert_eq!(wheel.state(), WheelState::Running);

        wheel.stop();
        wheel.stop();
        assert_eq!(wheel.state(), WheelState::Stopped);
        assert_eq!(wheel.start(), Err(TimerError::WheelStopped));

        let (_, callback) = counter();
        assert_eq!(
            wheel.schedule(Duration::from_secs(1), callback),
            Err(TimerError::WheelStopped)
        );
        assert_eq!(wheel.tick().await, 0);
        wheel.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_schedules_yield_unique_handles() {
        let wheel = Arc::new(TimingWheel::new(16, Duration::from_millis(10)).unwrap());
        let mut workers = Vec::new();
        for worker in 0..8u64 {
            let wheel = Arc::clone(&wheel);
            workers.push(tokio::spawn(async move {
                (0..100u64)
                    .map(|i| {
                        let delay = Duration::from_millis(10 + worker * 100 + i);
                        wheel.schedule(delay, || Ok::<(), TimerError>(())).unwrap()
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for worker in workers {
            ids.extend(worker.await.unwrap());
        }
        assert_eq!(ids.len(), 800);
        assert_eq!(wheel.pending(), 800);
        assert!(ids.iter().all(|id| wheel.cancel(*id)));
        assert_eq!(wheel.pending(), 0);
    }
}
