use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::error::RegMapError;
use crate::store::{lock, RegisterStore};
use crate::transport::RegisterTransport;

pub type SharedStore = Arc<Mutex<RegisterStore>>;
pub type SharedTransport = Arc<Mutex<Box<dyn RegisterTransport>>>;
pub type SweepCallback = Box<dyn FnMut() + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    /// Stop requested, the loop has not exited yet.
    Stopping,
}

/// Transaction counts of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub writes: usize,
    pub reads: usize,
    pub failures: usize,
    pub skipped: usize,
}

/// Stop flag with an interruptible sleep.
#[derive(Default)]
struct StopSignal {
    requested: Mutex<bool>,
    wake: Condvar,
    running: AtomicBool,
}

impl StopSignal {
    fn request(&self) {
        *lock(&self.requested) = true;
        self.wake.notify_all();
    }

    fn is_requested(&self) -> bool {
        *lock(&self.requested)
    }

    /// Sleep up to `interval`; true when a stop was requested meanwhile.
    fn wait(&self, interval: Duration) -> bool {
        let guard = lock(&self.requested);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, interval, |stop| !*stop)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard
    }
}

/// Clears `running` when the loop exits, panics included.
struct RunningGuard(Arc<StopSignal>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    handle: JoinHandle<()>,
    thread_id: ThreadId,
    signal: Arc<StopSignal>,
}

#[derive(Default)]
struct SchedulerInner {
    worker: Mutex<Option<Worker>>,
    last_signal: Mutex<Option<Arc<StopSignal>>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.signal.request();
            if thread::current().id() != worker.thread_id {
                let _ = worker.handle.join();
            }
        }
    }
}

/// Owns the background sweep thread of one client.
#[derive(Clone, Default)]
pub struct PollScheduler {
    inner: Arc<SchedulerInner>,
}

impl PollScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the sweep loop.
    ///
    /// # Errors
    ///
    /// `RegMapError::AlreadyPolling` when a loop is running or has been asked
    /// to stop but not exited yet, `Io` when the thread cannot be spawned.
    pub fn start(
        &self,
        store: SharedStore,
        transport: SharedTransport,
        interval: Duration,
        callback: Option<SweepCallback>,
    ) -> Result<(), RegMapError> {
        let mut slot = lock(&self.inner.worker);
        let winding_down = lock(&self.inner.last_signal)
            .as_ref()
            .is_some_and(|s| s.running.load(Ordering::SeqCst));
        if slot.is_some() || winding_down {
            return Err(RegMapError::AlreadyPolling);
        }
        let signal = Arc::new(StopSignal::default());
        signal.running.store(true, Ordering::SeqCst);
        let loop_signal = Arc::clone(&signal);
        let spawned = thread::Builder::new()
            .name("regmap-poll".into())
            .spawn(move || poll_loop(&store, &transport, interval, callback, loop_signal));
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                signal.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        log::info!("polling started, interval {interval:?}");
        *lock(&self.inner.last_signal) = Some(Arc::clone(&signal));
        *slot = Some(Worker {
            thread_id: handle.thread().id(),
            handle,
            signal,
        });
        Ok(())
    }

    /// Request the loop to stop.
    ///
    /// From any other thread this blocks until the loop has exited. From the
    /// sweep thread itself (the callback) it only raises the flag; the loop
    /// exits once the callback returns.
    pub fn stop(&self) {
        let worker = lock(&self.inner.worker).take();
        let Some(worker) = worker else {
            return;
        };
        worker.signal.request();
        if thread::current().id() == worker.thread_id {
            log::debug!("stop requested from the sweep thread");
            return;
        }
        if worker.handle.join().is_err() {
            log::error!("poll thread panicked");
        }
        log::info!("polling stopped");
    }

    #[must_use]
    pub fn state(&self) -> PollState {
        if lock(&self.inner.worker)
            .as_ref()
            .is_some_and(|w| !w.signal.is_requested())
        {
            return PollState::Polling;
        }
        match lock(&self.inner.last_signal).as_ref() {
            Some(s) if s.running.load(Ordering::SeqCst) => PollState::Stopping,
            _ => PollState::Idle,
        }
    }

    /// True when called from the sweep thread.
    #[must_use]
    pub fn is_sweep_thread(&self) -> bool {
        lock(&self.inner.worker)
            .as_ref()
            .is_some_and(|w| w.thread_id == thread::current().id())
    }
}

fn poll_loop(
    store: &Mutex<RegisterStore>,
    transport: &Mutex<Box<dyn RegisterTransport>>,
    interval: Duration,
    mut callback: Option<SweepCallback>,
    signal: Arc<StopSignal>,
) {
    let _running = RunningGuard(Arc::clone(&signal));
    while !signal.is_requested() {
        let report = sweep(store, transport);
        log::trace!("sweep done: {report:?}");
        if let Some(cb) = callback.as_mut() {
            cb();
        }
        if signal.wait(interval) {
            break;
        }
    }
    log::debug!("poll loop exited");
}

/// One pass over the store in map order: pending writes, then reads.
///
/// The store lock is held only while a register's state is read or updated,
/// never across a transaction.
pub fn sweep(
    store: &Mutex<RegisterStore>,
    transport: &Mutex<Box<dyn RegisterTransport>>,
) -> SweepReport {
    let mut report = SweepReport::default();
    let count = lock(store).len();
    for pos in 0..count {
        let (descriptor, pending, query) = {
            let mut guard = lock(store);
            let Some(register) = guard.at_mut(pos) else {
                break;
            };
            if register.descriptor().no_query() {
                report.skipped += 1;
                continue;
            }
            (
                register.descriptor_arc(),
                register.take_pending_write(),
                register.query_enabled(),
            )
        };
        let name = descriptor.name();

        let read = {
            let mut link = lock(transport);
            if let Some(value) = pending {
                let written = descriptor
                    .encode_for_write(&value)
                    .and_then(|words| link.write_words(descriptor.address(), &words));
                match written {
                    Ok(()) => report.writes += 1,
                    Err(e) => {
                        report.failures += 1;
                        log::warn!("write {name:?} failed: {e}");
                    }
                }
            }
            query.then(|| link.read_words(descriptor.address(), descriptor.words_out()))
        };

        match read {
            None => {}
            Some(Ok(words)) => {
                report.reads += 1;
                if let Some(register) = lock(store).at_mut(pos) {
                    if let Err(e) = register.record_read(words) {
                        log::warn!("decode {name:?} failed: {e}");
                    }
                }
            }
            Some(Err(e)) => {
                report.failures += 1;
                log::warn!("read {name:?} failed: {e}");
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_parser::parse_map;
    use std::sync::atomic::AtomicUsize;

    /// Echoes register addresses and records every transaction.
    #[derive(Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail_writes: bool,
    }

    impl RegisterTransport for Recorder {
        fn read_words(&mut self, address: u16, count: u16) -> Result<Vec<u16>, RegMapError> {
            lock(&self.log).push(format!("R{address}"));
            Ok(vec![address; usize::from(count)])
        }

        fn write_words(&mut self, address: u16, values: &[u16]) -> Result<(), RegMapError> {
            lock(&self.log).push(format!("W{address}={values:?}"));
            if self.fail_writes {
                Err(RegMapError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    fn fixture(fail_writes: bool) -> (SharedStore, SharedTransport, Arc<Mutex<Vec<String>>>) {
        let (map, _) = parse_map([
            r#"1,1,1,0,"A",">H","","","""#,
            r#"2,1,1,0,"B",">H","","","""#,
        ]);
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport: Box<dyn RegisterTransport> = Box::new(Recorder {
            log: Arc::clone(&log),
            fail_writes,
        });
        (
            Arc::new(Mutex::new(RegisterStore::from(map))),
            Arc::new(Mutex::new(transport)),
            log,
        )
    }

    #[test]
    fn one_write_one_read() {
        for fail_writes in [false, true] {
            let (store, transport, log) = fixture(fail_writes);
            {
                let mut s = lock(&store);
                s.stage_write("B", 7u16).unwrap();
                s.get_mut("B").unwrap().set_query(false);
            }
            let report = sweep(&store, &transport);
            assert_eq!(report.reads, 1);
            assert_eq!(*lock(&log), ["R1", "W2=[7]"]);
            assert!(!lock(&store).get("B").unwrap().write_pending());
            assert_eq!(report.failures, usize::from(fail_writes));
        }
    }

    #[test]
    fn no_query_directive_skips_register() {
        let (map, _) = parse_map([r#"5,1,1,0,"CMD",">H#","","","""#]);
        let store = Arc::new(Mutex::new(RegisterStore::from(map)));
        let log = Arc::new(Mutex::new(Vec::new()));
        let boxed: Box<dyn RegisterTransport> = Box::new(Recorder {
            log: Arc::clone(&log),
            fail_writes: false,
        });
        let transport = Mutex::new(boxed);
        lock(&store).stage_write("CMD", 1u16).unwrap();
        let report = sweep(&store, &transport);
        assert_eq!(report.skipped, 1);
        assert!(lock(&log).is_empty());
    }

    #[test]
    fn start_twice_is_an_error() {
        let (store, transport, _) = fixture(false);
        let poller = PollScheduler::new();
        poller
            .start(
                Arc::clone(&store),
                Arc::clone(&transport),
                Duration::from_millis(5),
                None,
            )
            .unwrap();
        assert_eq!(poller.state(), PollState::Polling);
        assert!(matches!(
            poller.start(store, transport, Duration::from_millis(5), None),
            Err(RegMapError::AlreadyPolling)
        ));
        poller.stop();
        assert_eq!(poller.state(), PollState::Idle);
    }

    #[test]
    fn stop_from_callback_does_not_deadlock() {
        let (store, transport, log) = fixture(false);
        let poller = PollScheduler::new();
        let sweeps = Arc::new(AtomicUsize::new(0));
        let (cb_poller, cb_sweeps) = (poller.clone(), Arc::clone(&sweeps));
        poller
            .start(
                store,
                transport,
                Duration::from_millis(1),
                Some(Box::new(move || {
                    cb_sweeps.fetch_add(1, Ordering::SeqCst);
                    assert!(cb_poller.is_sweep_thread());
                    cb_poller.stop();
                })),
            )
            .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while poller.state() != PollState::Idle {
            assert!(std::time::Instant::now() < deadline, "poll loop did not exit");
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sweeps.load(Ordering::SeqCst), 1);
        assert_eq!(lock(&log).len(), 2);
    }

    #[test]
    fn start_is_refused_until_a_stopping_loop_exits() {
        let (store, transport, _) = fixture(false);
        let poller = PollScheduler::new();
        let (stopped_tx, stopped_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let cb_poller = poller.clone();
        poller
            .start(
                Arc::clone(&store),
                Arc::clone(&transport),
                Duration::from_millis(1),
                Some(Box::new(move || {
                    cb_poller.stop();
                    let _ = stopped_tx.send(());
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                })),
            )
            .unwrap();
        stopped_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(poller.state(), PollState::Stopping);
        assert!(matches!(
            poller.start(
                Arc::clone(&store),
                Arc::clone(&transport),
                Duration::from_millis(5),
                None
            ),
            Err(RegMapError::AlreadyPolling)
        ));

        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while poller.state() != PollState::Idle {
            assert!(std::time::Instant::now() < deadline, "poll loop did not exit");
            thread::sleep(Duration::from_millis(5));
        }
        poller
            .start(store, transport, Duration::from_millis(5), None)
            .unwrap();
        assert_eq!(poller.state(), PollState::Polling);
        poller.stop();
        assert_eq!(poller.state(), PollState::Idle);
    }
}
