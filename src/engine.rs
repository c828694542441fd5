// src/engine.rs
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use crate::config::EngineConfig;
use crate::drivers::BufferClient;
use crate::error::EngineError;
use crate::events::{CancelToken, EventSender};
use crate::playback::Playback;
use crate::recorder::Recording;
use crate::session::Session;
use crate::types::*;
/// Creates a fresh client for every playback run.
pub type SinkFactory = Box<dyn Fn() -> Box<dyn BufferClient> + Send>;
struct Worker<T> {
    kind: WorkerKind,
    cancel: CancelToken,
    handle: JoinHandle<T>,
}
impl<T> Worker<T> {
    fn stop(self, events: &EventSender) -> Option<T> {
        self.cancel.cancel();
        self.join(events)
    }
    fn join(self, events: &EventSender) -> Option<T> {
        match self.handle.join() {
            Ok(value) => Some(value),
            Err(_) => {
                log::error!("{:?} worker panicked", self.kind);
                events.publish(EngineEvent::WorkerFailed {
                    worker: self.kind,
                    reason: "worker panicked".to_owned(),
                });
                None
            }
        }
    }
}
// 会话要么在引擎手里，要么被某个工作线程独占
enum Slot {
    Idle(Box<Session>),
    Busy(Worker<Box<Session>>),
    Lost(WorkerKind),
}
/// Owns the session and runs every long activity on its own thread.
pub struct Engine {
    slot: Slot,
    playback: Option<Worker<()>>,
    sink_factory: SinkFactory,
    events: EventSender,
    config: EngineConfig,
    link_up: Arc<AtomicBool>,
}
impl Engine {
    pub fn new(
        client: Box<dyn BufferClient>,
        sink_factory: SinkFactory,
        events: EventSender,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let params = config.block_parameters()?;
        let session = Session::new(client, events.clone()).with_parameters(params);
        let link_up = session.link_flag();
        Ok(Self {
            slot: Slot::Idle(Box::new(session)),
            playback: None,
            sink_factory,
            events,
            config,
            link_up,
        })
    }
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
    /// The session, unless a worker currently owns it.
    pub fn session(&mut self) -> Option<&Session> {
        self.reap();
        match &self.slot {
            Slot::Idle(session) => Some(session.as_ref()),
            _ => None,
        }
    }
    /// Kind of the worker that owns the session, if any.
    pub fn running(&mut self) -> Option<WorkerKind> {
        self.reap();
        match &self.slot {
            Slot::Busy(worker) => Some(worker.kind),
            _ => None,
        }
    }
    pub fn is_playing(&mut self) -> bool {
        self.reap();
        self.playback.is_some()
    }
    /// Joins workers that have already returned.
    pub fn reap(&mut self) {
        if matches!(&self.slot, Slot::Busy(worker) if worker.handle.is_finished()) {
            self.join_slot(false);
        }
        self.finish_connect();
        if self
            .playback
            .as_ref()
            .is_some_and(|worker| worker.handle.is_finished())
        {
            self.stop_playback();
        }
    }
    /// A connect worker that has reached `Connected` is only returning the
    /// session; wait for it instead of reporting it as busy.
    fn finish_connect(&mut self) {
        let connecting = matches!(&self.slot, Slot::Busy(worker) if worker.kind == WorkerKind::Connect);
        if connecting && self.link_up.load(Ordering::SeqCst) {
            log::debug!("connect worker reached Connected; taking the session back");
            self.join_slot(false);
        }
    }
    /// Joins the owning worker, cancelling it first when `cancel` is set.
    fn join_slot(&mut self, cancel: bool) {
        let slot = std::mem::replace(&mut self.slot, Slot::Lost(WorkerKind::Connect));
        self.slot = match slot {
            Slot::Busy(worker) => {
                let kind = worker.kind;
                let joined = if cancel {
                    worker.stop(&self.events)
                } else {
                    worker.join(&self.events)
                };
                match joined {
                    Some(session) => Slot::Idle(session),
                    None => Slot::Lost(kind),
                }
            }
            other => other,
        };
    }
    /// Takes the session back, stopping the owning worker if it is one of `stoppable`.
    fn idle_session(&mut self, stoppable: &[WorkerKind]) -> Result<&mut Session, EngineError> {
        self.reap();
        if let Slot::Busy(worker) = &self.slot {
            if !stoppable.contains(&worker.kind) {
                return Err(EngineError::Busy(worker.kind));
            }
            log::debug!("stopping {:?} worker", worker.kind);
            self.join_slot(true);
        }
        match &mut self.slot {
            Slot::Idle(session) => Ok(session.as_mut()),
            Slot::Busy(worker) => Err(EngineError::Busy(worker.kind)),
            Slot::Lost(kind) => Err(EngineError::WorkerPanicked(*kind)),
        }
    }
    fn spawn<F>(&mut self, kind: WorkerKind, job: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Session, &CancelToken) -> Result<(), EngineError> + Send + 'static,
    {
        let mut session = match std::mem::replace(&mut self.slot, Slot::Lost(kind)) {
            Slot::Idle(session) => session,
            Slot::Busy(worker) => {
                let busy = worker.kind;
                self.slot = Slot::Busy(worker);
                return Err(EngineError::Busy(busy));
            }
            Slot::Lost(lost) => {
                self.slot = Slot::Lost(lost);
                return Err(EngineError::WorkerPanicked(lost));
            }
        };
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let events = self.events.clone();
        let handle = thread::spawn(move || {
            if let Err(err) = job(session.as_mut(), &token) {
                log::error!("{kind:?} worker failed: {err}");
                events.publish(EngineEvent::WorkerFailed {
                    worker: kind,
                    reason: err.to_string(),
                });
            }
            session
        });
        self.slot = Slot::Busy(Worker {
            kind,
            cancel,
            handle,
        });
        Ok(())
    }
    // ============================================================
    // 1. 连接
    // ============================================================
    /// Starts connecting in the background; see [`Engine::await_connected`].
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), EngineError> {
        // 先同步断开，连接标志不会残留上一次的状态
        self.idle_session(&[
            WorkerKind::Connect,
            WorkerKind::Acquisition,
            WorkerKind::Calibration,
        ])?
        .disconnect();
        let policy = self.config.retry_policy();
        let host = host.to_owned();
        log::info!("connecting to {host}:{port}");
        self.spawn(WorkerKind::Connect, move |session, cancel| {
            session.connect(&host, port, &policy, cancel).map(|_| ())
        })
    }
    /// Waits up to `timeout` for the connect worker to hand the session back.
    /// Returns whether the session is connected.
    pub fn await_connected(&mut self, timeout: Duration) -> Result<bool, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.reap();
            match &self.slot {
                Slot::Busy(worker) if worker.kind == WorkerKind::Connect => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Slot::Busy(_) => return Ok(true),
                Slot::Idle(session) => return Ok(session.state() == ConnectionState::Connected),
                Slot::Lost(kind) => return Err(EngineError::WorkerPanicked(*kind)),
            }
        }
    }
    pub fn disconnect(&mut self) -> Result<(), EngineError> {
        let session = self.idle_session(&[
            WorkerKind::Connect,
            WorkerKind::Acquisition,
            WorkerKind::Calibration,
        ])?;
        session.disconnect();
        Ok(())
    }
    // ============================================================
    // 2. 数据采集 / 校准
    // ============================================================
    pub fn start_acquisition(&mut self) -> Result<(), EngineError> {
        let session = self.idle_session(&[WorkerKind::Acquisition, WorkerKind::Calibration])?;
        if session.state() != ConnectionState::Connected {
            return Err(EngineError::NotConnected);
        }
        let poll = self.config.poll_interval();
        self.spawn(WorkerKind::Acquisition, move |session, cancel| {
            session.run_acquisition(cancel, poll).map(|_| ())
        })
    }
    pub fn stop_acquisition(&mut self) {
        self.stop_kind(WorkerKind::Acquisition);
    }
    pub fn start_calibration(&mut self, target: CalibrationTarget) -> Result<(), EngineError> {
        let session = self.idle_session(&[WorkerKind::Acquisition, WorkerKind::Calibration])?;
        session.check_calibration(target)?;
        let seconds = self.config.calibration_seconds;
        let poll = self.config.poll_interval();
        self.spawn(WorkerKind::Calibration, move |session, cancel| {
            session.calibrate(target, seconds, poll, cancel).map(|_| ())
        })
    }
    pub fn stop_calibration(&mut self) {
        self.stop_kind(WorkerKind::Calibration);
    }
    fn stop_kind(&mut self, kind: WorkerKind) {
        self.reap();
        if matches!(&self.slot, Slot::Busy(worker) if worker.kind == kind) {
            self.join_slot(true);
        }
    }
    // ============================================================
    // 3. 参数调整（暂停采集 -> 修改 -> 恢复）
    // ============================================================
    fn with_paused<T>(
        &mut self,
        apply: impl FnOnce(&mut Session) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.reap();
        let resume = matches!(&self.slot, Slot::Busy(w) if w.kind == WorkerKind::Acquisition);
        let session = self.idle_session(&[WorkerKind::Acquisition])?;
        let result = apply(session);
        if resume {
            self.start_acquisition()?;
        }
        result
    }
    pub fn set_glide(&mut self, glide: usize) -> Result<(), EngineError> {
        self.with_paused(|session| session.set_glide(glide))
    }
    pub fn set_average_window(&mut self, average_window: usize) -> Result<(), EngineError> {
        self.with_paused(|session| session.set_average_window(average_window))
    }
    pub fn set_channels(&mut self, channels: &[usize]) -> Result<(), EngineError> {
        self.with_paused(|session| session.set_active_channels(channels).map(|_| ()))
    }
    pub fn activate(&mut self, channel: usize) -> Result<(), EngineError> {
        self.with_paused(|session| session.activate(channel).map(|_| ()))
    }
    pub fn deactivate(&mut self, channel: usize) -> Result<(), EngineError> {
        self.with_paused(|session| session.deactivate(channel).map(|_| ()))
    }
    pub fn save_recording(&mut self, path: &Path) -> Result<(), EngineError> {
        let recording = self.with_paused(|session| session.recording().ok_or(EngineError::NotConnected))?;
        recording.save(path)?;
        Ok(())
    }
    // ============================================================
    // 4. 回放
    // ============================================================
    pub fn start_playback(&mut self, path: &Path, host: &str, port: u16) -> Result<(), EngineError> {
        self.stop_playback();
        let recording = Recording::load(path)?;
        let mut playback = Playback::new(
            recording,
            (self.sink_factory)(),
            self.events.clone(),
            host,
            port,
        )
        .block_interval(self.config.playback_block_interval());
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let events = self.events.clone();
        let handle = thread::spawn(move || {
            if let Err(err) = playback.run(&token) {
                log::error!("playback failed: {err}");
                events.publish(EngineEvent::WorkerFailed {
                    worker: WorkerKind::Playback,
                    reason: err.to_string(),
                });
            }
        });
        self.playback = Some(Worker {
            kind: WorkerKind::Playback,
            cancel,
            handle,
        });
        Ok(())
    }
    pub fn stop_playback(&mut self) {
        if let Some(worker) = self.playback.take() {
            worker.stop(&self.events);
        }
    }
    pub fn shutdown(&mut self) {
        self.stop_playback();
        self.join_slot(true);
        if let Slot::Idle(session) = &mut self.slot {
            session.disconnect();
        }
    }
    /// Applies one command. Returns `false` once the engine has shut down.
    pub fn handle(&mut self, command: EngineCommand) -> Result<bool, EngineError> {
        log::debug!("command: {command:?}");
        match command {
            EngineCommand::Connect { host, port } => self.connect(&host, port)?,
            EngineCommand::Disconnect => self.disconnect()?,
            EngineCommand::SetGlide(glide) => self.set_glide(glide)?,
            EngineCommand::SetAverageWindow(window) => self.set_average_window(window)?,
            EngineCommand::SetChannels(channels) => self.set_channels(&channels)?,
            EngineCommand::ActivateChannel(channel) => self.activate(channel)?,
            EngineCommand::DeactivateChannel(channel) => self.deactivate(channel)?,
            EngineCommand::StartAcquisition => self.start_acquisition()?,
            EngineCommand::StopAcquisition => self.stop_acquisition(),
            EngineCommand::StartCalibration(target) => self.start_calibration(target)?,
            EngineCommand::StopCalibration => self.stop_calibration(),
            EngineCommand::StartPlayback { path, host, port } => {
                self.start_playback(&path, &host, port)?
            }
            EngineCommand::StopPlayback => self.stop_playback(),
            EngineCommand::SaveRecording(path) => self.save_recording(&path)?,
            EngineCommand::Shutdown => {
                self.shutdown();
                return Ok(false);
            }
        }
        Ok(true)
    }
}
impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
/// Runs `engine` on its own thread, fed by `commands`.
///
/// Rejected commands are reported as [`EngineEvent::CommandRejected`]; the
/// thread ends on `Shutdown` or when every command sender is gone.
pub fn spawn_controller(mut engine: Engine, commands: Receiver<EngineCommand>) -> JoinHandle<()> {
    thread::spawn(move || {
        log::info!("engine ready");
        loop {
            match commands.recv_timeout(Duration::from_millis(50)) {
                Ok(command) => match engine.handle(command) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        log::warn!("command rejected: {err}");
                        engine.events.publish(EngineEvent::CommandRejected {
                            reason: err.to_string(),
                        });
                    }
                },
                Err(RecvTimeoutError::Timeout) => engine.reap(),
                Err(RecvTimeoutError::Disconnected) => {
                    engine.shutdown();
                    break;
                }
            }
        }
        log::info!("engine stopped");
    })
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{BufferError, BufferHeader, MemoryBuffer};
    use crate::events::{self, EventReceiver};
    use crate::session::tests::{producer, synthetic};
    use ndarray::{Array2, ArrayView2};
    use std::sync::mpsc;
    fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval_ms: 1,
            connect_retry_ms: 1,
            header_poll_ms: 1,
            playback_block_interval_ms: 100,
            ..EngineConfig::default()
        }
    }
    fn engine(buffer: &MemoryBuffer) -> (Engine, EventReceiver) {
        let (tx, rx) = events::channel();
        let sinks = buffer.clone();
        let engine = Engine::new(
            Box::new(buffer.client()),
            Box::new(move || Box::new(sinks.client()) as Box<dyn BufferClient>),
            tx,
            fast_config(),
        )
        .unwrap();
        (engine, rx)
    }
    fn wait_for(rx: &EventReceiver, timeout: Duration, want: impl Fn(&EngineEvent) -> bool) -> Vec<EngineEvent> {
        let deadline = Instant::now() + timeout;
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            if let Some(event) = rx.recv_timeout(Duration::from_millis(20)) {
                let done = want(&event);
                seen.push(event);
                if done {
                    break;
                }
            }
        }
        seen
    }
    #[test]
    fn playback_feeds_live_acquisition() {
        let buffer = MemoryBuffer::new();
        let (mut engine, rx) = engine(&buffer);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alpha.csv");
        Recording::new(64.0, synthetic(64.0, 2, 5, 0)).save(&path).unwrap();
        engine.connect("localhost", 1972).unwrap();
        engine.start_playback(&path, "localhost", 1972).unwrap();
        assert!(engine.await_connected(Duration::from_secs(5)).unwrap());
        engine.set_channels(&[0, 1]).unwrap();
        engine.start_acquisition().unwrap();
        let events = wait_for(&rx, Duration::from_secs(5), |e| {
            *e == EngineEvent::PlaybackFinished
        });
        assert!(events.contains(&EngineEvent::PlaybackFinished));
        engine.stop_acquisition();
        let values: Vec<PowerSample> = events
            .iter()
            .chain(rx.drain().iter())
            .filter_map(|e| match e {
                EngineEvent::NewValues(sample) => Some(*sample),
                _ => None,
            })
            .collect();
        assert!(!values.is_empty());
        assert!(values.iter().all(|s| s.raw_low > s.raw_high));
        let session = engine.session().unwrap();
        assert_eq!(session.history().len(), values.len());
    }
    #[test]
    fn commands_right_after_connected_event_are_accepted() {
        for _ in 0..20 {
            let buffer = MemoryBuffer::new();
            producer(&buffer).put_header(2, 64.0, &[]).unwrap();
            let (mut engine, rx) = engine(&buffer);
            engine.connect("localhost", 1972).unwrap();
            let events = wait_for(&rx, Duration::from_secs(5), |e| {
                *e == EngineEvent::ConnectionChanged(ConnectionState::Connected)
            });
            assert!(events.contains(&EngineEvent::ConnectionChanged(ConnectionState::Connected)));
            engine.set_channels(&[0]).unwrap();
            engine.start_acquisition().unwrap();
            assert_eq!(engine.running(), Some(WorkerKind::Acquisition));
            engine.stop_acquisition();
        }
    }
    #[test]
    fn reconnect_does_not_reuse_previous_link() {
        let buffer = MemoryBuffer::new();
        producer(&buffer).put_header(2, 64.0, &[]).unwrap();
        let (mut engine, _rx) = engine(&buffer);
        engine.connect("localhost", 1972).unwrap();
        assert!(engine.await_connected(Duration::from_secs(5)).unwrap());
        buffer.refuse_connects(usize::MAX);
        engine.connect("localhost", 1972).unwrap();
        // the new attempt is still retrying, so it must not be joined
        assert!(matches!(
            engine.set_channels(&[0]),
            Err(EngineError::Busy(WorkerKind::Connect))
        ));
        engine.disconnect().unwrap();
    }
    #[test]
    fn acquisition_needs_connection() {
        let buffer = MemoryBuffer::new();
        let (mut engine, _rx) = engine(&buffer);
        assert!(matches!(
            engine.start_acquisition(),
            Err(EngineError::NotConnected)
        ));
    }
    #[test]
    fn parameter_change_restarts_acquisition() {
        let buffer = MemoryBuffer::new();
        producer(&buffer).put_header(2, 64.0, &[]).unwrap();
        let (mut engine, _rx) = engine(&buffer);
        engine.connect("localhost", 1972).unwrap();
        assert!(engine.await_connected(Duration::from_secs(5)).unwrap());
        engine.start_acquisition().unwrap();
        engine.set_glide(2).unwrap();
        assert_eq!(engine.running(), Some(WorkerKind::Acquisition));
        assert!(engine.set_glide(3).is_err());
        assert_eq!(engine.running(), Some(WorkerKind::Acquisition));
        engine.stop_acquisition();
        assert_eq!(engine.session().unwrap().params().glide(), 2);
    }
    #[test]
    fn calibration_blocks_parameter_changes() {
        let buffer = MemoryBuffer::new();
        producer(&buffer).put_header(1, 64.0, &[]).unwrap();
        let (mut engine, rx) = engine(&buffer);
        engine.connect("localhost", 1972).unwrap();
        assert!(engine.await_connected(Duration::from_secs(5)).unwrap());
        assert!(matches!(
            engine.start_calibration(CalibrationTarget::LOW),
            Err(EngineError::InvalidArgument(_))
        ));
        engine.set_channels(&[0]).unwrap();
        engine.start_calibration(CalibrationTarget::LOW).unwrap();
        assert!(matches!(
            engine.set_average_window(4),
            Err(EngineError::Busy(WorkerKind::Calibration))
        ));
        engine.stop_calibration();
        engine.set_average_window(4).unwrap();
        assert!(!rx
            .drain()
            .iter()
            .any(|e| matches!(e, EngineEvent::CalibrationFinished(_))));
    }
    #[test]
    fn disconnect_cancels_pending_connect() {
        let buffer = MemoryBuffer::new();
        buffer.set_online(false);
        let (mut engine, _rx) = engine(&buffer);
        engine.connect("localhost", 1972).unwrap();
        assert!(!engine.await_connected(Duration::from_millis(30)).unwrap());
        engine.disconnect().unwrap();
        assert_eq!(
            engine.session().unwrap().state(),
            ConnectionState::NotConnected
        );
    }
    struct PanickingClient;
    impl BufferClient for PanickingClient {
        fn connect(&mut self, _host: &str, _port: u16) -> Result<(), BufferError> {
            Ok(())
        }
        fn disconnect(&mut self) {}
        fn is_connected(&self) -> bool {
            true
        }
        fn get_header(&mut self) -> Result<Option<BufferHeader>, BufferError> {
            panic!("header decoder blew up")
        }
        fn get_data(&mut self, _begin: u64, _end: u64) -> Result<Array2<f32>, BufferError> {
            Err(BufferError::NotConnected)
        }
        fn put_header(&mut self, _: usize, _: f32, _: &[String]) -> Result<(), BufferError> {
            Ok(())
        }
        fn put_data(&mut self, _block: ArrayView2<f32>) -> Result<(), BufferError> {
            Ok(())
        }
    }
    #[test]
    fn panicked_worker_loses_session() {
        let (tx, rx) = events::channel();
        let mut engine = Engine::new(
            Box::new(PanickingClient),
            Box::new(|| Box::new(PanickingClient) as Box<dyn BufferClient>),
            tx,
            fast_config(),
        )
        .unwrap();
        engine.connect("localhost", 1972).unwrap();
        assert!(matches!(
            engine.await_connected(Duration::from_secs(5)),
            Err(EngineError::WorkerPanicked(WorkerKind::Connect))
        ));
        assert!(matches!(
            engine.set_glide(2),
            Err(EngineError::WorkerPanicked(WorkerKind::Connect))
        ));
        assert!(rx.drain().iter().any(|e| matches!(
            e,
            EngineEvent::WorkerFailed {
                worker: WorkerKind::Connect,
                ..
            }
        )));
    }
    #[test]
    fn controller_reports_rejected_commands() {
        let buffer = MemoryBuffer::new();
        let (engine, rx) = engine(&buffer);
        let (commands, inbox) = mpsc::channel();
        let controller = spawn_controller(engine, inbox);
        commands.send(EngineCommand::SetChannels(vec![3])).unwrap();
        commands.send(EngineCommand::SetGlide(0)).unwrap();
        commands.send(EngineCommand::Shutdown).unwrap();
        controller.join().unwrap();
        let rejected = rx
            .drain()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::CommandRejected { .. }))
            .count();
        assert_eq!(rejected, 2);
    }
}
