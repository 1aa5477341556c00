//! Process-side connection to the router.

use super::framing::{read_frame, write_frame};
use super::{RouterFrame, SessionId, TransportError};
use crate::core::{RemoteOutlet, ServiceDirectory};
use crate::event::RemoteEvent;
use crate::service::StubAddress;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

struct LinkThread {
    shutdown_sender: Option<oneshot::Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

/// Carries a directory's remote traffic to and from the router.
///
/// Events from the router are delivered into the directory on the link's
/// own thread; outgoing frames are queued and never block the caller.
pub struct RouterLink {
    session: SessionId,
    sender: mpsc::UnboundedSender<RouterFrame>,
    connected: Arc<AtomicBool>,
    directory: Weak<ServiceDirectory>,
    thread: Mutex<LinkThread>,
}

impl RouterLink {
    /// Connects to the router at `address` and attaches the link to `directory`.
    ///
    /// Blocks until the router has welcomed the connection or `timeout` expires.
    pub fn connect(
        address: &str,
        directory: &Arc<ServiceDirectory>,
        timeout: Duration,
    ) -> Result<Arc<Self>, TransportError> {
        let address = address.to_string();
        let (sender, outbound) = mpsc::unbounded_channel();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (ready_sender, ready_receiver) = std_mpsc::channel::<Result<SessionId, TransportError>>();
        let connected = Arc::new(AtomicBool::new(false));

        let thread_connected = connected.clone();
        let thread_directory = Arc::downgrade(directory);
        let thread_handle = std::thread::Builder::new()
            .name("svcbus-router-link".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_sender.send(Err(e.into()));
                        return;
                    }
                };
                runtime.block_on(Self::run(
                    address,
                    timeout,
                    outbound,
                    thread_directory,
                    &thread_connected,
                    ready_sender,
                    shutdown_receiver,
                ));
                thread_connected.store(false, Ordering::SeqCst);
            })?;

        let session = match ready_receiver.recv_timeout(timeout) {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                return Err(e);
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                let _ = shutdown_sender.send(());
                return Err(TransportError::StartTimeout(timeout));
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                let _ = thread_handle.join();
                return Err(TransportError::StartAborted);
            }
        };

        let link = Arc::new(Self {
            session,
            sender,
            connected,
            directory: Arc::downgrade(directory),
            thread: Mutex::new(LinkThread {
                shutdown_sender: Some(shutdown_sender),
                thread_handle: Some(thread_handle),
            }),
        });
        directory.set_remote(link.clone());
        log::info!("Connected to router as session {}", session);
        Ok(link)
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Detaches from the directory and closes the connection.
    pub fn close(&self) {
        if let Some(directory) = self.directory.upgrade() {
            directory.clear_remote();
        }
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(shutdown_sender) = thread.shutdown_sender.take() {
            let _ = shutdown_sender.send(());
        }
        if let Some(thread_handle) = thread.thread_handle.take() {
            // the link thread never joins itself
            if thread_handle.thread().id() != std::thread::current().id() {
                let _ = thread_handle.join();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn run(
        address: String,
        timeout: Duration,
        mut outbound: mpsc::UnboundedReceiver<RouterFrame>,
        directory: Weak<ServiceDirectory>,
        connected: &AtomicBool,
        ready_sender: std_mpsc::Sender<Result<SessionId, TransportError>>,
        mut shutdown_receiver: oneshot::Receiver<()>,
    ) {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                let _ = ready_sender.send(Err(e.into()));
                return;
            }
            Err(_) => {
                let _ = ready_sender.send(Err(TransportError::StartTimeout(timeout)));
                return;
            }
        };
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let session = match read_frame(&mut reader).await {
            Ok(Some(RouterFrame::Welcome { session })) => session,
            Ok(other) => {
                let _ = ready_sender.send(Err(TransportError::Handshake(format!(
                    "expected welcome, got {:?}",
                    other
                ))));
                return;
            }
            Err(e) => {
                let _ = ready_sender.send(Err(e.into()));
                return;
            }
        };
        connected.store(true, Ordering::SeqCst);
        let _ = ready_sender.send(Ok(session));

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    log::warn!("Router link write failed: {}", e);
                    break;
                }
            }
        });

        let inbound = async {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(RouterFrame::Event { event })) => match directory.upgrade() {
                        Some(directory) => directory.deliver_remote(event),
                        None => break,
                    },
                    Ok(Some(other)) => log::debug!("Ignoring router frame {:?}", other),
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("Router link read failed: {}", e);
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = inbound => log::info!("Router closed session {}", session),
            _ = &mut shutdown_receiver => log::debug!("Router link received exit signal"),
        }
        writer.abort();
    }

    fn send(&self, frame: RouterFrame) -> bool {
        self.is_connected() && self.sender.send(frame).is_ok()
    }
}

impl RemoteOutlet for RouterLink {
    fn forward(&self, event: RemoteEvent) -> bool {
        self.send(RouterFrame::Event { event })
    }

    fn announce_stub(&self, address: &StubAddress) {
        if !self.send(RouterFrame::RegisterStub {
            address: address.clone(),
        }) {
            log::warn!("Router link down, stub {} not announced", address);
        }
    }

    fn withdraw_stub(&self, address: &StubAddress) {
        self.send(RouterFrame::UnregisterStub {
            address: address.clone(),
        });
    }
}

impl Drop for RouterLink {
    fn drop(&mut self) {
        let thread = self.thread.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(shutdown_sender) = thread.shutdown_sender.take() {
            let _ = shutdown_sender.send(());
        }
        thread.thread_handle.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let directory = ServiceDirectory::new();
        let result = RouterLink::connect(&address, &directory, Duration::from_secs(5));
        assert!(result.is_err());
        assert!(!directory.has_remote());
    }
}
