//! Router-side TCP transport.
//!
//! One OS thread runs a current-thread runtime with the accept loop and a
//! relay hub. Every connection is a session: a reader task feeding the hub
//! and a writer task draining the session's outbound queue. The hub owns the
//! [`RelayTable`] and is the only place routing state changes.
//!
//! While paused the listener stays bound but is not accepted from, and hub
//! input is queued; resuming replays the queue.

use super::framing::{read_frame, write_frame};
use super::{RouterFrame, SessionId, Transport, TransportError};
use crate::config::RouterConfig;
use crate::router::relay::{Delivery, RelayTable};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

enum HubInput {
    Opened {
        session: SessionId,
        sender: mpsc::UnboundedSender<RouterFrame>,
    },
    Frame {
        session: SessionId,
        frame: RouterFrame,
    },
    Closed {
        session: SessionId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeMode {
    Running,
    Paused,
    Stopped,
}

struct RunningServer {
    mode: watch::Sender<ServeMode>,
    /// Modes as the serve loop applies them.
    applied: std_mpsc::Receiver<ServeMode>,
    timeout: Duration,
    thread_handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl RunningServer {
    /// Switches the serve loop and waits until it runs in `target` mode.
    fn switch(&self, target: ServeMode) -> bool {
        self.mode.send_replace(target);
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.applied.recv_timeout(remaining) {
                Ok(mode) if mode == target => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }
}

#[derive(Default)]
pub struct TcpTransport {
    config: Option<RouterConfig>,
    running: Option<RunningServer>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound address while the service runs; resolves port 0 to the real port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// True while started, paused or not.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| *running.mode.borrow() == ServeMode::Paused)
    }

    async fn serve(
        listener: TcpListener,
        max_sessions: usize,
        mut mode: watch::Receiver<ServeMode>,
        applied: std_mpsc::Sender<ServeMode>,
    ) {
        let (input_sender, mut input_receiver) = mpsc::unbounded_channel();
        let mut hub = RelayHub::default();
        let mut held: VecDeque<HubInput> = VecDeque::new();
        let mut next_session: SessionId = 1;
        let mut last_applied = None;

        loop {
            let current = *mode.borrow_and_update();
            if current == ServeMode::Stopped {
                log::debug!("Transport received exit signal");
                break;
            }
            let paused = current == ServeMode::Paused;
            if !paused && !held.is_empty() {
                log::info!("Relaying {} held inputs", held.len());
                while let Some(input) = held.pop_front() {
                    hub.handle(input);
                }
            }
            if last_applied != Some(current) {
                last_applied = Some(current);
                let _ = applied.send(current);
            }

            tokio::select! {
                changed = mode.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept(), if !paused => {
                    match accepted {
                        Ok((stream, peer)) if hub.sessions.len() < max_sessions => {
                            let session = next_session;
                            next_session += 1;
                            log::info!("Session {} opened from {}", session, peer);
                            tokio::spawn(Self::run_session(stream, session, input_sender.clone()));
                        }
                        Ok((_, peer)) => {
                            log::warn!("Session limit {} reached, refusing {}", max_sessions, peer);
                        }
                        Err(e) => log::error!("Accept failed: {}", e),
                    }
                }
                Some(input) = input_receiver.recv() => {
                    if paused {
                        held.push_back(input);
                    } else {
                        hub.handle(input);
                    }
                }
            }
        }
    }

    async fn run_session(
        stream: TcpStream,
        session: SessionId,
        inputs: mpsc::UnboundedSender<HubInput>,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let (sender, mut outbound) = mpsc::unbounded_channel::<RouterFrame>();
        if inputs.send(HubInput::Opened { session, sender }).is_err() {
            return;
        }

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    log::debug!("Session {} write failed: {}", session, e);
                    break;
                }
            }
        });

        let mut reader = BufReader::new(read_half);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if inputs.send(HubInput::Frame { session, frame }).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Session {} sent a malformed frame: {}", session, e);
                    break;
                }
            }
        }

        let _ = inputs.send(HubInput::Closed { session });
        writer.abort();
    }
}

impl Transport for TcpTransport {
    fn configure(&mut self, config: &RouterConfig) -> Result<(), TransportError> {
        config.validate()?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn start_remoting_service(&mut self) -> Result<(), TransportError> {
        if self.running.is_some() {
            return Ok(());
        }
        let config = self.config.clone().ok_or(TransportError::NotConfigured)?;
        let address = config.socket_addr()?;
        let timeout = config.start_timeout();
        let (mode, mode_receiver) = watch::channel(ServeMode::Running);
        let (applied_sender, applied) = std_mpsc::channel();
        let (ready_sender, ready_receiver) = std_mpsc::channel::<std::io::Result<SocketAddr>>();

        let thread_handle = std::thread::Builder::new()
            .name("svcrouter-transport".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_sender.send(Err(e));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let listener = match TcpListener::bind(address).await {
                        Ok(listener) => listener,
                        Err(e) => {
                            let _ = ready_sender.send(Err(e));
                            return;
                        }
                    };
                    let bound = listener.local_addr();
                    let ready = bound.is_ok();
                    let _ = ready_sender.send(bound);
                    if ready {
                        Self::serve(listener, config.max_sessions, mode_receiver, applied_sender).await;
                    }
                });
            })?;

        let local_addr = match ready_receiver.recv_timeout(timeout) {
            Ok(Ok(local_addr)) => local_addr,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(TransportError::Io(e));
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                mode.send_replace(ServeMode::Stopped);
                return Err(TransportError::StartTimeout(timeout));
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                let _ = thread_handle.join();
                return Err(TransportError::StartAborted);
            }
        };

        log::info!("Remoting service listening on {}", local_addr);
        self.running = Some(RunningServer {
            mode,
            applied,
            timeout,
            thread_handle: Some(thread_handle),
            local_addr,
        });
        Ok(())
    }

    fn pause_remoting_service(&mut self) {
        let Some(running) = &self.running else {
            return;
        };
        if running.switch(ServeMode::Paused) {
            log::info!("Remoting service on {} paused", running.local_addr);
        } else {
            log::warn!("Remoting service on {} did not confirm pause", running.local_addr);
        }
    }

    fn resume_remoting_service(&mut self) -> Result<(), TransportError> {
        let Some(running) = &self.running else {
            return self.start_remoting_service();
        };
        if !running.switch(ServeMode::Running) {
            return Err(TransportError::StartTimeout(running.timeout));
        }
        log::info!("Remoting service on {} resumed", running.local_addr);
        Ok(())
    }

    fn stop_remoting_service(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.mode.send_replace(ServeMode::Stopped);
        if let Some(thread_handle) = running.thread_handle.take() {
            let _ = thread_handle.join();
        }
        log::info!("Remoting service on {} stopped", running.local_addr);
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop_remoting_service();
    }
}

/// Session outbound queues plus the routing table.
#[derive(Default)]
struct RelayHub {
    relay: RelayTable,
    sessions: HashMap<SessionId, mpsc::UnboundedSender<RouterFrame>>,
}

impl RelayHub {
    fn handle(&mut self, input: HubInput) {
        match input {
            HubInput::Opened { session, sender } => {
                let _ = sender.send(RouterFrame::Welcome { session });
                self.sessions.insert(session, sender);
            }
            HubInput::Frame { session, frame } => match frame {
                RouterFrame::RegisterStub { address } => {
                    self.relay.register_stub(session, address);
                }
                RouterFrame::UnregisterStub { address } => {
                    self.relay.unregister_stub(session, &address);
                }
                RouterFrame::Event { event } => {
                    let deliveries = self.relay.route(session, event);
                    self.deliver(deliveries);
                }
                RouterFrame::Welcome { .. } => {
                    log::warn!("Session {} sent an unexpected welcome", session);
                }
            },
            HubInput::Closed { session } => {
                self.sessions.remove(&session);
                let deliveries = self.relay.close_session(session);
                self.deliver(deliveries);
                log::info!("Session {} closed", session);
            }
        }
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        for (session, event) in deliveries {
            match self.sessions.get(&session) {
                Some(sender) => {
                    if sender.send(RouterFrame::Event { event }).is_err() {
                        log::debug!("Session {} closing, event dropped", session);
                    }
                }
                None => log::warn!("No session {} for relayed event", session),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn config() -> RouterConfig {
        RouterConfig {
            listen_address: "127.0.0.1:0".to_string(),
            ..RouterConfig::default()
        }
    }

    #[test]
    fn test_start_requires_configuration() {
        let mut transport = TcpTransport::new();
        assert!(!transport.is_configured());
        assert!(matches!(
            transport.start_remoting_service(),
            Err(TransportError::NotConfigured)
        ));
    }

    #[test]
    fn test_bad_address_rejected_by_configure() {
        let mut transport = TcpTransport::new();
        let config = RouterConfig {
            listen_address: "nowhere".to_string(),
            ..RouterConfig::default()
        };
        assert!(matches!(transport.configure(&config), Err(TransportError::Config(_))));
        assert!(!transport.is_configured());
    }

    #[test]
    fn test_restart_keeps_configuration() {
        let mut transport = TcpTransport::new();
        transport.configure(&config()).unwrap();
        transport.start_remoting_service().unwrap();
        assert!(transport.local_addr().is_some());

        transport.stop_remoting_service();
        assert!(!transport.is_running());
        assert!(transport.is_configured());

        transport.start_remoting_service().unwrap();
        assert!(transport.is_running());
        transport.stop_remoting_service();
    }

    #[test]
    fn test_new_connection_is_welcomed() {
        let mut transport = TcpTransport::new();
        transport.configure(&config()).unwrap();
        transport.start_remoting_service().unwrap();
        let address = transport.local_addr().unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let stream = TcpStream::connect(address).await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let welcome = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut reader))
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(welcome, Some(RouterFrame::Welcome { .. })));

            // garbage closes only this session
            write_half.write_all(b"hello\r\n").await.unwrap();
            let closed = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut reader))
                .await
                .unwrap();
            assert!(matches!(closed, Ok(None) | Err(_)));
        });

        assert!(transport.is_running());
        transport.stop_remoting_service();
    }

    #[test]
    fn test_pause_keeps_sessions_and_defers_new_ones() {
        let mut transport = TcpTransport::new();
        transport.configure(&config()).unwrap();
        transport.start_remoting_service().unwrap();
        let address = transport.local_addr().unwrap();
        let wait = Duration::from_secs(5);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (first, _first_writer) = runtime.block_on(async {
            let (read_half, write_half) = TcpStream::connect(address).await.unwrap().into_split();
            let mut reader = BufReader::new(read_half);
            let welcome = tokio::time::timeout(wait, read_frame(&mut reader)).await.unwrap().unwrap();
            assert!(matches!(welcome, Some(RouterFrame::Welcome { session: 1 })));
            (reader, write_half)
        });

        transport.pause_remoting_service();
        assert!(transport.is_paused());
        assert_eq!(transport.local_addr(), Some(address));

        let mut second = runtime.block_on(async {
            // the listener stays bound; the connection waits in the backlog
            let (read_half, write_half) = TcpStream::connect(address).await.unwrap().into_split();
            let mut reader = BufReader::new(read_half);
            let early = tokio::time::timeout(Duration::from_millis(300), read_frame(&mut reader)).await;
            assert!(early.is_err());
            (reader, write_half)
        });

        transport.resume_remoting_service().unwrap();
        assert!(!transport.is_paused());
        runtime.block_on(async {
            let welcome = tokio::time::timeout(wait, read_frame(&mut second.0))
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(welcome, Some(RouterFrame::Welcome { session: 2 })));
        });
        drop(first);
        transport.stop_remoting_service();
    }
}
