use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use frame_pacer::{FramePacer, FramePacerConfig};
use smallvec::SmallVec;
use surface_protocol::{
    CooperatingLock, ErrorSeverity, ErrorSink, LogErrorSink, NoCooperatingLock, Surface,
    SurfaceError, same_surface,
};
use swap_scheduler::SwapScheduler;

/// Lifecycle of the render thread. `Starting` begins when the first surface
/// is activated; `Stopped` is terminal and the thread is never recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Uninitialized,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

fn is_terminal(phase: ControllerPhase) -> bool {
    matches!(
        phase,
        ControllerPhase::ShuttingDown | ControllerPhase::Stopped
    )
}

#[derive(Clone)]
pub struct RenderControlConfig {
    pub pacing: FramePacerConfig,
    /// Skip the parallel swap pool and swap every surface sequentially on
    /// the render thread.
    pub swap_single_threaded: bool,
    /// Released around every blocking wait issued by a controlling thread.
    pub cooperating_lock: Arc<dyn CooperatingLock>,
    /// Receives every error that must not cross a thread boundary.
    pub error_sink: Arc<dyn ErrorSink>,
}

impl Default for RenderControlConfig {
    fn default() -> Self {
        Self {
            pacing: FramePacerConfig::default(),
            swap_single_threaded: false,
            cooperating_lock: Arc::new(NoCooperatingLock),
            error_sink: Arc::new(LogErrorSink),
        }
    }
}

/// Signals the render thread that the pending-call slot holds work.
enum DispatchSignal {
    ServiceCall,
}

#[derive(Clone)]
enum CallOp {
    AddSurface(Arc<dyn Surface>),
    RemoveSurface(Arc<dyn Surface>),
    Shutdown,
}

/// Transient cross-thread call state. At most one of these exists at a time;
/// controlling threads queue on the slot.
struct PendingCall {
    op: CallOp,
    completed: bool,
    result: Result<(), SurfaceError>,
}

impl PendingCall {
    fn new(op: CallOp) -> Self {
        Self {
            op,
            completed: false,
            result: Ok(()),
        }
    }
}

/// Everything guarded by the call barrier: the pending-call slot, the
/// surface registry, and the lifecycle phase. Registry entries are inserted
/// and removed only while servicing calls on the render thread.
struct CallState {
    phase: ControllerPhase,
    pending: Option<PendingCall>,
    registry: Vec<Arc<dyn Surface>>,
    /// Held here until the render thread is spawned and takes it.
    dispatch_receiver: Option<Receiver<DispatchSignal>>,
    render_thread: Option<JoinHandle<()>>,
    shutdown_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

struct ControllerShared {
    state: Mutex<CallState>,
    call_complete: Condvar,
    cooperating: Arc<dyn CooperatingLock>,
    error_sink: Arc<dyn ErrorSink>,
    pacing: FramePacerConfig,
    swap_single_threaded: bool,
}

impl ControllerShared {
    fn lock_state(&self) -> MutexGuard<'_, CallState> {
        self.state
            .lock()
            .unwrap_or_else(|_| panic!("call barrier poisoned"))
    }

    fn wait<'a>(&self, state: MutexGuard<'a, CallState>) -> MutexGuard<'a, CallState> {
        self.call_complete
            .wait(state)
            .unwrap_or_else(|_| panic!("call barrier poisoned"))
    }
}

/// Releases the embedding environment's cooperating lock for a scope that
/// may block, re-acquiring it on the way out.
struct CooperatingRegion<'a> {
    lock: &'a dyn CooperatingLock,
}

impl<'a> CooperatingRegion<'a> {
    fn enter(lock: &'a dyn CooperatingLock) -> Self {
        lock.release();
        Self { lock }
    }
}

impl Drop for CooperatingRegion<'_> {
    fn drop(&mut self) {
        self.lock.acquire();
    }
}

/// Single authority over the render thread and the surface registry.
///
/// Constructed once by the embedding application and shared by cloning;
/// every clone talks to the same render thread. The thread itself is started
/// lazily by the first [`add_surface`](RenderController::add_surface) and is
/// never recreated after shutdown.
#[derive(Clone)]
pub struct RenderController {
    shared: Arc<ControllerShared>,
    /// Every controller clone holds a sender; the render thread holds only
    /// the receiver, so dropping the last clone disconnects the channel and
    /// lets the thread tear itself down.
    dispatch: Sender<DispatchSignal>,
}

impl RenderController {
    pub fn new(config: RenderControlConfig) -> Self {
        let (dispatch, dispatch_receiver) = unbounded();
        Self {
            shared: Arc::new(ControllerShared {
                state: Mutex::new(CallState {
                    phase: ControllerPhase::Uninitialized,
                    pending: None,
                    registry: Vec::new(),
                    dispatch_receiver: Some(dispatch_receiver),
                    render_thread: None,
                    shutdown_callbacks: Vec::new(),
                }),
                call_complete: Condvar::new(),
                cooperating: config.cooperating_lock,
                error_sink: config.error_sink,
                pacing: config.pacing,
                swap_single_threaded: config.swap_single_threaded,
            }),
            dispatch,
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        self.shared.lock_state().phase
    }

    /// Number of live registry entries. Diagnostic only; the value may be
    /// stale the moment it is read.
    pub fn surface_count(&self) -> usize {
        self.shared.lock_state().registry.len()
    }

    /// Create `surface` on the render thread and register it for painting.
    ///
    /// Starts the render thread if this is the first surface, then blocks
    /// until the render thread has created and registered the surface. A
    /// `create` failure leaves the registry untouched and is returned.
    /// During or after shutdown the call is a no-op and returns `Ok`.
    pub fn add_surface(&self, surface: Arc<dyn Surface>) -> Result<(), SurfaceError> {
        let _cooperating = CooperatingRegion::enter(self.shared.cooperating.as_ref());
        self.ensure_render_thread();

        let state = self.shared.lock_state();
        let (mut state, claimed) = self.claim_call_slot(state);
        if !claimed {
            log::info!("ignoring surface add during shutdown");
            return Ok(());
        }
        log::info!("adding a surface to the render thread");
        state.pending = Some(PendingCall::new(CallOp::AddSurface(surface)));
        self.signal_render_thread();
        let (_state, result) = self.wait_for_completion(state);
        result
    }

    /// Destroy `surface` on the render thread and drop it from the registry,
    /// blocking until done.
    ///
    /// Precondition: the surface was previously added. Violating this is a
    /// programming error, detected by a debug assertion.
    pub fn remove_surface(&self, surface: Arc<dyn Surface>) {
        let _cooperating = CooperatingRegion::enter(self.shared.cooperating.as_ref());

        let mut state = self.shared.lock_state();
        debug_assert!(
            state.phase != ControllerPhase::Uninitialized,
            "remove_surface called for a surface that was never added"
        );
        if state.phase == ControllerPhase::Uninitialized {
            return;
        }
        while state.phase == ControllerPhase::Starting {
            state = self.shared.wait(state);
        }
        if is_terminal(state.phase) {
            // Shutdown is already tearing every surface down.
            return;
        }
        debug_assert!(
            state
                .registry
                .iter()
                .any(|registered| same_surface(registered, &surface)),
            "remove_surface called for a surface that was never added"
        );

        let (mut state, claimed) = self.claim_call_slot(state);
        if !claimed {
            return;
        }
        log::info!("removing a surface from the render thread");
        state.pending = Some(PendingCall::new(CallOp::RemoveSurface(surface)));
        self.signal_render_thread();
        let (_state, _result) = self.wait_for_completion(state);
    }

    /// Render-thread context: a native close event already tore the window
    /// down, so the surface only needs to leave the registry. No round trip
    /// and no `destroy` call; the render thread holds authority here.
    pub fn report_closed_by_user(&self, surface: &Arc<dyn Surface>) {
        let mut state = self.shared.lock_state();
        if let Some(index) = state
            .registry
            .iter()
            .position(|registered| same_surface(registered, surface))
        {
            state.registry.remove(index);
            log::info!("surface closed by the user");
        }
    }

    /// Render-thread context: begin shutdown without a cross-thread round
    /// trip (the "last window closed, exit configured" path). Completes any
    /// in-flight pending call as a no-op so its caller cannot hang.
    ///
    /// The registry is left intact: the caller is inside the current cycle's
    /// `paint`/`swap`, so destroying surfaces here would let the rest of the
    /// cycle touch dead surfaces. The loop-exit drain destroys them once the
    /// cycle has finished.
    pub fn quit(&self) {
        let mut state = self.shared.lock_state();
        if is_terminal(state.phase) {
            return;
        }
        log::info!("initiating shutdown from the render thread");
        state.phase = ControllerPhase::ShuttingDown;
        if let Some(pending) = state.pending.as_mut() {
            pending.completed = true;
        }
        self.shared.call_complete.notify_all();
    }

    /// Destroy every registered surface and stop the render thread's loop,
    /// blocking until the thread has exited. Idempotent: repeated or
    /// concurrent calls all complete without error.
    pub fn shutdown(&self) {
        let _cooperating = CooperatingRegion::enter(self.shared.cooperating.as_ref());

        let mut state = self.shared.lock_state();
        loop {
            match state.phase {
                ControllerPhase::Uninitialized => {
                    // Nothing ever started; become terminal in place.
                    state.phase = ControllerPhase::Stopped;
                    let callbacks = std::mem::take(&mut state.shutdown_callbacks);
                    self.shared.call_complete.notify_all();
                    drop(state);
                    for callback in callbacks {
                        callback();
                    }
                    return;
                }
                ControllerPhase::Stopped => return,
                ControllerPhase::ShuttingDown => {
                    self.wait_for_stop_and_join(state);
                    return;
                }
                ControllerPhase::Starting => state = self.shared.wait(state),
                ControllerPhase::Running => break,
            }
        }

        let (mut state, claimed) = self.claim_call_slot(state);
        if !claimed {
            // Lost the race to another shutdown; wait it out.
            self.wait_for_stop_and_join(state);
            return;
        }
        log::info!("initiating shutdown from the controlling thread");
        state.pending = Some(PendingCall::new(CallOp::Shutdown));
        self.signal_render_thread();
        let (state, _result) = self.wait_for_completion(state);
        self.wait_for_stop_and_join(state);
    }

    /// Register a callback fired exactly once when the render thread's loop
    /// exits. If the loop has already exited the callback fires immediately
    /// on the calling thread.
    pub fn on_shutdown_complete(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.lock_state();
        if state.phase == ControllerPhase::Stopped {
            drop(state);
            callback();
            return;
        }
        state.shutdown_callbacks.push(Box::new(callback));
    }

    /// Lazily start the render thread and block until it reports itself
    /// alive. Returns with the phase past `Starting`.
    fn ensure_render_thread(&self) {
        let mut state = self.shared.lock_state();
        if state.phase == ControllerPhase::Uninitialized {
            state.phase = ControllerPhase::Starting;
            let dispatch_receiver = state
                .dispatch_receiver
                .take()
                .unwrap_or_else(|| panic!("render thread dispatcher missing"));
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name("render".to_string())
                .spawn(move || render_thread_main(shared, dispatch_receiver));
            match spawned {
                Ok(handle) => {
                    log::info!("render thread started");
                    state.render_thread = Some(handle);
                }
                Err(error) => {
                    // A controller without a render thread cannot service
                    // any future surface; there is no retry.
                    let error = SurfaceError::CreateFailed {
                        reason: format!("render thread spawn failed: {error}"),
                    };
                    self.shared.error_sink.report(ErrorSeverity::Fatal, &error);
                    std::process::exit(1);
                }
            }
        }
        while state.phase == ControllerPhase::Starting {
            state = self.shared.wait(state);
        }
    }

    /// Wait until the pending-call slot is free and the controller is not
    /// shutting down. Returns `false` when shutdown won the race.
    fn claim_call_slot<'a>(
        &self,
        mut state: MutexGuard<'a, CallState>,
    ) -> (MutexGuard<'a, CallState>, bool) {
        while state.pending.is_some() {
            if is_terminal(state.phase) {
                return (state, false);
            }
            state = self.shared.wait(state);
        }
        let claimed = !is_terminal(state.phase);
        (state, claimed)
    }

    fn wait_for_completion<'a>(
        &self,
        mut state: MutexGuard<'a, CallState>,
    ) -> (MutexGuard<'a, CallState>, Result<(), SurfaceError>) {
        while state
            .pending
            .as_ref()
            .is_some_and(|pending| !pending.completed)
        {
            state = self.shared.wait(state);
        }
        let result = state.pending.take().map_or(Ok(()), |pending| pending.result);
        // Wake any caller queued on the now-free slot.
        self.shared.call_complete.notify_all();
        (state, result)
    }

    fn signal_render_thread(&self) {
        self.dispatch
            .send(DispatchSignal::ServiceCall)
            .unwrap_or_else(|_| panic!("render thread dispatcher disconnected"));
    }

    fn wait_for_stop_and_join(&self, mut state: MutexGuard<'_, CallState>) {
        while state.phase != ControllerPhase::Stopped {
            state = self.shared.wait(state);
        }
        let handle = state.render_thread.take();
        drop(state);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// The render thread's own loop: service cross-thread calls until the pacing
/// deadline, run one paint/swap cycle, re-arm with the pacer's delay.
fn render_thread_main(shared: Arc<ControllerShared>, dispatch: Receiver<DispatchSignal>) {
    log::info!("render thread running");
    {
        let mut state = shared.lock_state();
        if state.phase == ControllerPhase::Starting {
            state.phase = ControllerPhase::Running;
        }
        shared.call_complete.notify_all();
    }

    let pacer = FramePacer::new(shared.pacing);
    let mut scheduler = SwapScheduler::new(shared.swap_single_threaded, shared.error_sink.clone());

    // First cycle runs immediately; afterwards the pacer decides.
    let mut delay = Duration::ZERO;
    'event_loop: loop {
        let deadline = Instant::now() + delay;
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match dispatch.recv_timeout(timeout) {
                Ok(DispatchSignal::ServiceCall) => {
                    if !service_pending_call(&shared) {
                        break 'event_loop;
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                // Every controller handle is gone; nobody can call us again.
                Err(RecvTimeoutError::Disconnected) => break 'event_loop,
            }
        }
        match run_poll_cycle(&shared, &mut scheduler, &pacer) {
            Some(next_delay) => delay = next_delay,
            None => break 'event_loop,
        }
    }

    scheduler.shutdown();
    let callbacks = {
        let mut state = shared.lock_state();
        state.phase = ControllerPhase::Stopped;
        // Registry entries that survive to loop exit (a render-thread quit,
        // or every controller handle dropped) are torn down here, after the
        // last cycle has finished with them.
        for surface in state.registry.drain(..) {
            surface.destroy();
        }
        shared.call_complete.notify_all();
        std::mem::take(&mut state.shutdown_callbacks)
    };
    log::info!("render thread exiting");
    for callback in callbacks {
        callback();
    }
}

/// Service the pending call under the barrier. Surface `create`/`destroy`
/// are registry mutations and run here; paint and swap never do. Returns
/// `false` once shutdown has been serviced.
fn service_pending_call(shared: &ControllerShared) -> bool {
    let mut state = shared.lock_state();
    let op = match state.pending.as_ref() {
        Some(pending) if !pending.completed => pending.op.clone(),
        // quit() completed the call already, or the caller has taken it.
        _ => return !is_terminal(state.phase),
    };

    let mut result = Ok(());
    match op {
        CallOp::AddSurface(surface) => {
            if !is_terminal(state.phase) {
                match surface.create() {
                    Ok(()) => state.registry.push(surface),
                    Err(error) => {
                        shared
                            .error_sink
                            .report(ErrorSeverity::Recoverable, &error);
                        result = Err(error);
                    }
                }
            }
        }
        CallOp::RemoveSurface(surface) => {
            match state
                .registry
                .iter()
                .position(|registered| same_surface(registered, &surface))
            {
                Some(index) => {
                    let removed = state.registry.remove(index);
                    removed.destroy();
                }
                // The user may have closed the window while this call was
                // queued; the registry entry is already gone.
                None => {}
            }
        }
        CallOp::Shutdown => {
            state.phase = ControllerPhase::ShuttingDown;
            for surface in state.registry.drain(..) {
                surface.destroy();
            }
        }
    }

    if let Some(pending) = state.pending.as_mut() {
        pending.completed = true;
        pending.result = result;
    }
    shared.call_complete.notify_all();
    !is_terminal(state.phase)
}

/// One poll iteration. Returns the delay before the next cycle, or `None`
/// when shutdown is in progress. The barrier is held only long enough to
/// snapshot the registry; paint and swap run without it.
fn run_poll_cycle(
    shared: &ControllerShared,
    scheduler: &mut SwapScheduler,
    pacer: &FramePacer,
) -> Option<Duration> {
    let snapshot: SmallVec<[Arc<dyn Surface>; 4]> = {
        let state = shared.lock_state();
        if is_terminal(state.phase) {
            return None;
        }
        state.registry.iter().cloned().collect()
    };
    let report = scheduler.run_cycle(&snapshot);
    Some(pacer.next_interval(report))
}
