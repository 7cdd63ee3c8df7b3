//! Fixed-period two-lens still capture with one cycle of delivery latency.
//!
//! Each tick first hands the previous cycle's images to the listener, then
//! captures front and back strictly in sequence. The next tick is armed only
//! after the back capture settles, counted from that moment, so ticks never
//! overlap and a slow cycle delays rather than compounds.

use crate::capture::{CaptureFault, CaptureListener, CaptureResult, ImageBytes, Lens};
use crate::capture_cycle::{CaptureCycle, CapturePhase, CaptureStats, LensOutcome};
use crate::executor::Dispatcher;
use crate::hal::CaptureDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default spacing between the end of one cycle and the next tick.
pub const CAPTURE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: CAPTURE_INTERVAL,
        }
    }
}

struct Shared<D: CaptureDevice> {
    device: Arc<D>,
    ui: Arc<dyn Dispatcher>,
    config: CaptureConfig,
    cycle: Mutex<CaptureCycle>,
    lenses: Mutex<[bool; 2]>,
    listener: Mutex<Option<Arc<dyn CaptureListener>>>,
    absence_reported: AtomicBool,
}

impl<D: CaptureDevice> Shared<D> {
    fn cycle(&self) -> MutexGuard<'_, CaptureCycle> {
        self.cycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listener(&self) -> Option<Arc<dyn CaptureListener>> {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lens_enabled(&self, lens: Lens) -> bool {
        let lenses = self.lenses.lock().unwrap_or_else(|e| e.into_inner());
        match lens {
            Lens::Front => lenses[0],
            Lens::Back => lenses[1],
        }
    }

    fn deliver(&self, result: CaptureResult) {
        debug!(
            front_bytes = result.front.as_ref().map_or(0, Vec::len),
            back_bytes = result.back.as_ref().map_or(0, Vec::len),
            "Delivering previous cycle"
        );
        if let Some(listener) = self.listener() {
            listener.on_images_ready(result.front, result.back);
        }
    }

    fn cycle_complete(&self, cycle_ms: u64) {
        if let Some(listener) = self.listener() {
            listener.on_cycle_complete(cycle_ms);
        }
    }

    fn report_fault(&self, lens: Lens, fault: &CaptureFault) {
        warn!(%lens, error = %fault, "Lens capture failed");
        if let Some(listener) = self.listener() {
            listener.on_capture_error(lens, fault);
        }
    }
}

/// Owns the capture device and drives the repeating front/back cycle on a timer runtime.
pub struct IntervalCaptureScheduler<D: CaptureDevice> {
    shared: Arc<Shared<D>>,
    timer: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<D: CaptureDevice> IntervalCaptureScheduler<D> {
    /// `ui` is the only context sessions are bound and unbound on; `timer` owns tick scheduling.
    pub fn new(device: Arc<D>, ui: Arc<dyn Dispatcher>, config: CaptureConfig, timer: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                device,
                ui,
                config,
                cycle: Mutex::new(CaptureCycle::new()),
                lenses: Mutex::new([true, true]),
                listener: Mutex::new(None),
                absence_reported: AtomicBool::new(false),
            }),
            timer,
            task: Mutex::new(None),
        }
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn CaptureListener>>) {
        *self.shared.listener.lock().unwrap_or_else(|e| e.into_inner()) = listener;
    }

    /// Clears all buffers and arms the first tick one interval from now.
    ///
    /// Returns whether the loop is running afterwards; a device without any
    /// lens is reported once and never starts.
    pub fn start(&self) -> bool {
        let lenses = Lens::ALL.map(|lens| self.shared.device.has_lens(lens));
        if !lenses.iter().any(|present| *present) {
            if !self.shared.absence_reported.swap(true, Ordering::Relaxed) {
                warn!("No camera lens available, interval capture disabled");
            }
            return false;
        }

        // The task slot is held until the new loop is stored so a concurrent
        // stop() cannot split the phase change from the handle swap.
        let mut task = self.task();
        let epoch = {
            let mut cycle = self.shared.cycle();
            match cycle.start() {
                Some(epoch) => epoch,
                None => {
                    debug!("Interval capture already started");
                    return true;
                }
            }
        };
        *self.shared.lenses.lock().unwrap_or_else(|e| e.into_inner()) = lenses;
        for (lens, present) in Lens::ALL.iter().zip(lenses) {
            if !present {
                warn!(%lens, "Lens not available, its slot stays empty");
            }
        }

        let shared = Arc::clone(&self.shared);
        let handle = self.timer.spawn(run_cycles(shared, epoch));
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        drop(task);
        info!(
            epoch,
            interval_ms = self.shared.config.interval.as_millis() as u64,
            "Interval capture started"
        );
        true
    }

    /// Cancels the pending tick. In-flight captures complete and are discarded.
    pub fn stop(&self) {
        let mut task = self.task();
        let was_running = self.shared.cycle().stop();
        if let Some(handle) = task.take() {
            handle.abort();
        }
        drop(task);
        if was_running {
            info!("Interval capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.cycle().phase() != CapturePhase::Idle
    }

    pub fn phase(&self) -> CapturePhase {
        self.shared.cycle().phase()
    }

    pub fn stats(&self) -> CaptureStats {
        self.shared.cycle().stats()
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<D: CaptureDevice> Drop for IntervalCaptureScheduler<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_cycles<D: CaptureDevice>(shared: Arc<Shared<D>>, epoch: u64) {
    loop {
        tokio::time::sleep(shared.config.interval).await;

        let tick_start = Instant::now();
        let pending = match shared.cycle().begin_tick(epoch) {
            Ok(pending) => pending,
            Err(_) => return,
        };
        if let Some(result) = pending {
            shared.deliver(result);
        }

        let (front, front_fault) = capture_stage(&shared, Lens::Front).await;
        if shared.cycle().complete_front(epoch, front).is_err() {
            debug!(epoch, "Discarding front capture completed after stop");
            return;
        }
        if let Some(fault) = front_fault {
            shared.report_fault(Lens::Front, &fault);
        }

        let (back, back_fault) = capture_stage(&shared, Lens::Back).await;
        let cycle_ms = tick_start.elapsed().as_millis() as u64;
        if shared.cycle().complete_back(epoch, back, cycle_ms).is_err() {
            debug!(epoch, "Discarding back capture completed after stop");
            return;
        }
        if let Some(fault) = back_fault {
            shared.report_fault(Lens::Back, &fault);
        }
        debug!(epoch, cycle_ms, "Capture cycle complete");
        shared.cycle_complete(cycle_ms);

        if shared.cycle().arm_next(epoch).is_err() {
            return;
        }
    }
}

async fn capture_stage<D: CaptureDevice>(
    shared: &Arc<Shared<D>>,
    lens: Lens,
) -> (LensOutcome, Option<CaptureFault>) {
    if !shared.lens_enabled(lens) {
        return (LensOutcome::Skipped, None);
    }
    match capture_one_shot(shared, lens).await {
        Ok(bytes) => (LensOutcome::Captured(bytes), None),
        Err(fault) => (LensOutcome::Failed, Some(fault)),
    }
}

/// Binds a transient session on the UI context, requests one image and
/// unbinds on the UI context again, whichever thread the completion arrives on.
async fn capture_one_shot<D: CaptureDevice>(
    shared: &Arc<Shared<D>>,
    lens: Lens,
) -> Result<ImageBytes, CaptureFault> {
    let (tx, rx) = oneshot::channel();
    let device = Arc::clone(&shared.device);
    let ui = Arc::clone(&shared.ui);

    shared.ui.dispatch(Box::new(move || {
        let session = match device.bind_session(lens) {
            Ok(session) => Arc::new(session),
            Err(fault) => {
                let _ = tx.send(Err(fault));
                return;
            }
        };
        let unbind_device = Arc::clone(&device);
        let unbind_session = Arc::clone(&session);
        device.capture(
            &session,
            Box::new(move |result| {
                ui.dispatch(Box::new(move || unbind_device.unbind(&unbind_session)));
                // Receiver is gone once the loop was stopped; the result is dropped.
                let _ = tx.send(result);
            }),
        );
    }));

    rx.await.unwrap_or(Err(CaptureFault::Abandoned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureEvent;
    use crate::hal::CaptureCompletion;
    use crate::executor::{Task, TimerContext};
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::sync::mpsc::{sync_channel, Receiver};

    thread_local! {
        static ON_UI: Cell<bool> = const { Cell::new(false) };
    }

    /// Inline dispatcher that marks the running task as being on the UI context.
    #[derive(Default)]
    struct MarkedUi {
        dispatched: AtomicUsize,
    }

    impl Dispatcher for MarkedUi {
        fn dispatch(&self, task: Task) {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            let outer = ON_UI.with(|f| f.replace(true));
            task();
            ON_UI.with(|f| f.set(outer));
        }
    }

    struct FakeSession {
        lens: Lens,
    }

    /// Completes each capture after `latency` of (paused) tokio time.
    struct FakeCamera {
        latency: Duration,
        failing: Mutex<HashSet<(u64, Lens)>>,
        captures: AtomicU64,
        binds: AtomicU64,
        unbinds: AtomicU64,
        off_ui: AtomicU64,
        bound: Mutex<bool>,
        front_available: bool,
    }

    impl FakeCamera {
        fn new() -> Self {
            Self {
                latency: Duration::from_millis(25),
                failing: Mutex::new(HashSet::new()),
                captures: AtomicU64::new(0),
                binds: AtomicU64::new(0),
                unbinds: AtomicU64::new(0),
                off_ui: AtomicU64::new(0),
                bound: Mutex::new(false),
                front_available: true,
            }
        }

        /// Fails the capture on `lens` during the given 1-based cycle.
        fn fail_on(self, cycle: u64, lens: Lens) -> Self {
            self.failing.lock().unwrap().insert((cycle, lens));
            self
        }

        fn note_context(&self) {
            if !ON_UI.with(Cell::get) {
                self.off_ui.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl CaptureDevice for FakeCamera {
        type Session = FakeSession;

        fn has_lens(&self, lens: Lens) -> bool {
            lens == Lens::Back || self.front_available
        }

        fn bind_session(&self, lens: Lens) -> Result<FakeSession, CaptureFault> {
            self.note_context();
            let mut bound = self.bound.lock().unwrap();
            if *bound {
                return Err(CaptureFault::DeviceBusy);
            }
            *bound = true;
            self.binds.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession { lens })
        }

        fn capture(&self, session: &FakeSession, on_complete: CaptureCompletion) {
            let n = self.captures.fetch_add(1, Ordering::SeqCst);
            let lens = session.lens;
            let cycle = if self.front_available { n / 2 + 1 } else { n + 1 };
            let fail = self.failing.lock().unwrap().contains(&(cycle, lens));
            let latency = self.latency;
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                if fail {
                    on_complete(Err(CaptureFault::Device("sensor glitch".into())));
                } else {
                    on_complete(Ok(vec![cycle as u8, lens as u8]));
                }
            });
        }

        fn unbind(&self, _session: &FakeSession) {
            self.note_context();
            *self.bound.lock().unwrap() = false;
            self.unbinds.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scheduler(
        camera: FakeCamera,
    ) -> (
        IntervalCaptureScheduler<FakeCamera>,
        Arc<FakeCamera>,
        Receiver<CaptureEvent>,
    ) {
        let camera = Arc::new(camera);
        let scheduler = IntervalCaptureScheduler::new(
            Arc::clone(&camera),
            Arc::new(MarkedUi::default()),
            CaptureConfig::default(),
            Handle::current(),
        );
        let (tx, rx) = sync_channel(64);
        scheduler.set_listener(Some(Arc::new(tx)));
        (scheduler, camera, rx)
    }

    fn images(front: u8, back: u8) -> CaptureEvent {
        CaptureEvent::ImagesReady(CaptureResult {
            front: Some(vec![front, Lens::Front as u8]),
            back: Some(vec![back, Lens::Back as u8]),
        })
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_delivery_happens_on_second_tick() {
        let (scheduler, camera, rx) = scheduler(FakeCamera::new());
        assert!(scheduler.start());

        // tick1 at 500, front done 525, back done 550.
        sleep_ms(560).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.stats().cycles_completed, 1);
        assert_eq!(scheduler.phase(), CapturePhase::Running);
        assert_eq!(camera.captures.load(Ordering::SeqCst), 2);

        // tick2 at 1050 delivers tick1's images before capturing again.
        sleep_ms(495).await;
        assert_eq!(rx.try_recv(), Ok(images(1, 1)));
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.phase(), CapturePhase::CapturingFront);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn deliveries_lag_ticks_by_one() {
        let (scheduler, _camera, rx) = scheduler(FakeCamera::new());
        scheduler.start();

        // Ticks at 500, 1050, 1600, 2150, 2700.
        sleep_ms(2710).await;
        let stats = scheduler.stats();
        assert_eq!(stats.ticks, 5);
        let delivered: Vec<CaptureEvent> = rx.try_iter().collect();
        assert_eq!(delivered.len(), 4);
        assert_eq!(delivered[0], images(1, 1));
        assert_eq!(delivered[3], images(4, 4));
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_back_lens_reported_and_skipped() {
        let (scheduler, _camera, rx) = scheduler(FakeCamera::new().fail_on(2, Lens::Back));
        scheduler.start();

        // tick2 fails back at ~1100, tick3 at 1600 delivers it.
        sleep_ms(1610).await;
        let events: Vec<CaptureEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                images(1, 1),
                CaptureEvent::Error {
                    lens: Lens::Back,
                    fault: CaptureFault::Device("sensor glitch".into()),
                },
                CaptureEvent::ImagesReady(CaptureResult {
                    front: Some(vec![2, Lens::Front as u8]),
                    back: None,
                }),
            ]
        );
        assert_eq!(scheduler.stats().back_failures, 1);
        assert!(scheduler.is_running());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn bind_and_unbind_run_on_ui_context() {
        let (scheduler, camera, _rx) = scheduler(FakeCamera::new());
        scheduler.start();
        sleep_ms(1200).await;
        scheduler.stop();
        sleep_ms(100).await;

        let binds = camera.binds.load(Ordering::SeqCst);
        assert_eq!(binds, 4);
        assert_eq!(camera.unbinds.load(Ordering::SeqCst), binds);
        assert_eq!(camera.off_ui.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_in_flight_completion() {
        let (scheduler, camera, rx) = scheduler(FakeCamera::new());
        scheduler.start();

        // Stop mid-way through tick1's front capture.
        sleep_ms(510).await;
        assert_eq!(scheduler.phase(), CapturePhase::CapturingFront);
        scheduler.stop();
        sleep_ms(2000).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.phase(), CapturePhase::Idle);
        assert_eq!(camera.captures.load(Ordering::SeqCst), 1);
        // The device still completes and the session is released.
        assert_eq!(camera.unbinds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_never_delivers_buffers_from_before_stop() {
        let (scheduler, _camera, rx) = scheduler(FakeCamera::new());
        scheduler.start();
        sleep_ms(560).await;
        assert!(!scheduler.shared.cycle().pending().is_empty());

        scheduler.stop();
        assert!(scheduler.start());
        assert!(scheduler.shared.cycle().pending().is_empty());

        // New run: tick at 1060 captures, tick at 1610 delivers the new images.
        sleep_ms(1100).await;
        let events: Vec<CaptureEvent> = rx.try_iter().collect();
        assert_eq!(events, vec![images(2, 2)]);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let (scheduler, camera, _rx) = scheduler(FakeCamera::new());
        assert!(scheduler.start());
        assert!(scheduler.start());
        sleep_ms(560).await;
        assert_eq!(camera.captures.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.stats().ticks, 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_lens_is_skipped_without_errors() {
        let mut camera = FakeCamera::new();
        camera.front_available = false;
        let (scheduler, _camera, rx) = scheduler(camera);
        scheduler.start();
        sleep_ms(1060).await;
        let events: Vec<CaptureEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![CaptureEvent::ImagesReady(CaptureResult {
                front: None,
                back: Some(vec![1, Lens::Back as u8]),
            })]
        );
        scheduler.stop();
    }

    #[derive(Default)]
    struct CycleDurations {
        cycle_ms: Mutex<Vec<u64>>,
    }

    impl CaptureListener for CycleDurations {
        fn on_images_ready(&self, _front: Option<ImageBytes>, _back: Option<ImageBytes>) {}
        fn on_capture_error(&self, _lens: Lens, _fault: &CaptureFault) {}
        fn on_cycle_complete(&self, cycle_ms: u64) {
            self.cycle_ms.lock().unwrap().push(cycle_ms);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn every_finished_cycle_reports_its_duration() {
        let (scheduler, _camera, _rx) = scheduler(FakeCamera::new().fail_on(2, Lens::Front));
        let durations = Arc::new(CycleDurations::default());
        scheduler.set_listener(Some(durations.clone()));
        scheduler.start();

        // Three cycles finish at 550, 1100 and 1650.
        sleep_ms(1660).await;
        scheduler.stop();
        let reported = durations.cycle_ms.lock().unwrap().clone();
        assert_eq!(reported.len() as u64, scheduler.stats().cycles_completed);
        assert_eq!(reported, vec![50, 50, 50]);
    }

    #[test]
    fn stop_holds_task_slot_across_phase_change() {
        let timer = TimerContext::new("cam-lifecycle").unwrap();
        let scheduler = IntervalCaptureScheduler::new(
            Arc::new(FakeCamera::new()),
            Arc::new(MarkedUi::default()),
            CaptureConfig::default(),
            timer.handle(),
        );
        assert!(scheduler.start());

        std::thread::scope(|scope| {
            let slot = scheduler.task();
            let stopper = scope.spawn(|| scheduler.stop());
            std::thread::sleep(Duration::from_millis(50));
            // stop() is parked on the slot and has not touched the phase yet.
            assert_eq!(scheduler.phase(), CapturePhase::Running);
            assert!(slot.is_some());
            drop(slot);
            stopper.join().unwrap();
        });
        assert_eq!(scheduler.phase(), CapturePhase::Idle);
        assert!(scheduler.task().is_none());

        std::thread::scope(|scope| {
            let slot = scheduler.task();
            let starter = scope.spawn(|| scheduler.start());
            std::thread::sleep(Duration::from_millis(50));
            assert_eq!(scheduler.phase(), CapturePhase::Idle);
            drop(slot);
            assert!(starter.join().unwrap());
        });
        assert!(scheduler.is_running());
        assert!(scheduler.task().is_some());

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert!(scheduler.task().is_none());
    }
}
