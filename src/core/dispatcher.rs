//! Single-consumer event dispatcher bound to one OS thread.
//!
//! Any thread may post events; only the dispatcher thread consumes them, in
//! FIFO order, handing each to the consumer registered for its kind and
//! target. Stub and proxy state is mutated only from inside that loop.

use super::registry::{ListenerTable, Registration};
use crate::error::{BusError, BusResult};
use crate::event::{EventKind, EventTarget, ServiceEvent};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Receiver of events dequeued by a dispatcher.
pub trait EventConsumer: Send {
    fn process_event(&mut self, event: ServiceEvent);
}

pub type SharedConsumer = Arc<Mutex<dyn EventConsumer>>;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum DispatchItem {
    Event(ServiceEvent),
    Task(Task),
}

/// Cloneable posting/registration side of a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<DispatchItem>,
    listeners: Arc<ListenerTable>,
}

impl DispatcherHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues an event. Never blocks.
    pub fn post_event(&self, event: ServiceEvent) -> BusResult<()> {
        self.sender
            .send(DispatchItem::Event(event))
            .map_err(|_| BusError::DispatcherClosed(self.name.to_string()))
    }

    /// Queues a closure to run on the dispatcher thread, ordered with events.
    pub fn execute<F>(&self, task: F) -> BusResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(DispatchItem::Task(Box::new(task)))
            .map_err(|_| BusError::DispatcherClosed(self.name.to_string()))
    }

    pub fn register(
        &self,
        kinds: &[EventKind],
        target: EventTarget,
        consumer: SharedConsumer,
    ) -> BusResult<Registration> {
        self.listeners.insert(kinds, target, consumer)
    }

    pub fn listeners(&self) -> &Arc<ListenerTable> {
        &self.listeners
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// A dispatcher thread. Stops on [`stop`](Self::stop) or drop.
pub struct Dispatcher {
    handle: DispatcherHandle,
    shutdown_sender: Option<oneshot::Sender<()>>,
    stopped_receiver: Option<std_mpsc::Receiver<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns the dispatcher thread and blocks until it reports ready.
    ///
    /// `timeout` of `None` waits indefinitely.
    pub fn start(name: impl Into<String>, timeout: Option<Duration>) -> BusResult<Self> {
        let name: String = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (ready_sender, ready_receiver) = std_mpsc::channel::<std::io::Result<()>>();
        let (stopped_sender, stopped_receiver) = std_mpsc::channel();
        let listeners = ListenerTable::new();

        let loop_name = name.clone();
        let loop_listeners = listeners.clone();
        let thread_handle = std::thread::Builder::new().name(name.clone()).spawn(move || {
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
            let _ = ready_sender.send(Ok(()));
            runtime.block_on(Self::run_dispatch_loop(
                loop_name,
                receiver,
                loop_listeners,
                shutdown_receiver,
            ));
            let _ = stopped_sender.send(());
        })?;

        let mut dispatcher = Self {
            handle: DispatcherHandle {
                name: Arc::from(name.as_str()),
                sender,
                listeners,
            },
            shutdown_sender: Some(shutdown_sender),
            stopped_receiver: Some(stopped_receiver),
            thread_handle: Some(thread_handle),
        };

        match wait_signal(&ready_receiver, timeout, &name) {
            Ok(Ok(())) => {
                log::info!("Dispatcher {} started", name);
                Ok(dispatcher)
            }
            Ok(Err(e)) => {
                dispatcher.detach();
                Err(BusError::Io(e))
            }
            Err(e) => {
                dispatcher.detach();
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    pub fn post_event(&self, event: ServiceEvent) -> BusResult<()> {
        self.handle.post_event(event)
    }

    pub fn execute<F>(&self, task: F) -> BusResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.execute(task)
    }

    /// Signals exit and blocks until the thread has finished, or `timeout` expires.
    pub fn stop(&mut self, timeout: Option<Duration>) -> BusResult<()> {
        log::debug!("Stopping dispatcher {}", self.name());
        if let Some(shutdown_sender) = self.shutdown_sender.take() {
            let _ = shutdown_sender.send(());
        }

        if let Some(stopped_receiver) = self.stopped_receiver.take() {
            match wait_signal(&stopped_receiver, timeout, self.handle.name()) {
                Ok(()) | Err(BusError::DispatcherClosed(_)) => {}
                Err(e) => {
                    // leave the thread detached; it exits on its own
                    self.thread_handle.take();
                    return Err(e);
                }
            }
        }

        if let Some(thread_handle) = self.thread_handle.take() {
            let _ = thread_handle.join();
        }
        log::info!("Dispatcher {} stopped", self.name());
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(shutdown_sender) = self.shutdown_sender.take() {
            let _ = shutdown_sender.send(());
        }
        self.stopped_receiver.take();
        self.thread_handle.take();
    }

    async fn run_dispatch_loop(
        name: String,
        mut receiver: mpsc::UnboundedReceiver<DispatchItem>,
        listeners: Arc<ListenerTable>,
        mut shutdown_receiver: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_receiver => {
                    log::debug!("Dispatcher {} received exit signal", name);
                    break;
                }
                item = receiver.recv() => {
                    match item {
                        Some(DispatchItem::Event(event)) => Self::dispatch(&name, &listeners, event),
                        Some(DispatchItem::Task(task)) => task(),
                        None => {
                            log::debug!("Dispatcher {} queue closed", name);
                            break;
                        }
                    }
                }
            }
        }
    }

    fn dispatch(name: &str, listeners: &ListenerTable, event: ServiceEvent) {
        let kind = event.kind();
        let target = event.target();
        match listeners.lookup(kind, &target) {
            Some(consumer) => {
                log::trace!("Dispatcher {} delivering {:?} to {}", name, kind, target);
                let mut consumer = consumer.lock().unwrap_or_else(PoisonError::into_inner);
                consumer.process_event(event);
            }
            None => {
                log::warn!("Dispatcher {}: no listener for {:?} event to {}", name, kind, target);
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            log::debug!("Dispatcher {} dropped without explicit stop", self.name());
            let _ = self.stop(None);
        }
    }
}

fn wait_signal<T>(
    receiver: &std_mpsc::Receiver<T>,
    timeout: Option<Duration>,
    name: &str,
) -> BusResult<T> {
    match timeout {
        Some(timeout) => receiver.recv_timeout(timeout).map_err(|e| match e {
            std_mpsc::RecvTimeoutError::Timeout => BusError::DispatcherTimeout(name.to_string()),
            std_mpsc::RecvTimeoutError::Disconnected => BusError::DispatcherClosed(name.to_string()),
        }),
        None => receiver
            .recv()
            .map_err(|_| BusError::DispatcherClosed(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RequestEvent, ResultKind, ResponseEvent};
    use crate::service::{MessageId, Payload, ProxyAddress, StubAddress};

    const WAIT: Duration = Duration::from_secs(5);

    struct Recorder {
        seen: std_mpsc::Sender<ServiceEvent>,
    }

    impl EventConsumer for Recorder {
        fn process_event(&mut self, event: ServiceEvent) {
            let _ = self.seen.send(event);
        }
    }

    fn request(seq: u64) -> ServiceEvent {
        ServiceEvent::Request(RequestEvent::new(
            ProxyAddress::new("Chat", "main", "client"),
            StubAddress::new("Chat", "main"),
            MessageId(0x1000),
            seq,
            Payload::new(),
        ))
    }

    fn stub_target() -> EventTarget {
        EventTarget::Stub(StubAddress::new("Chat", "main"))
    }

    #[test]
    fn test_events_delivered_in_fifo_order() {
        let mut dispatcher = Dispatcher::start("fifo", Some(WAIT)).unwrap();
        let (seen, observed) = std_mpsc::channel();
        let _registration = dispatcher
            .handle()
            .register(
                &[EventKind::Request],
                stub_target(),
                Arc::new(Mutex::new(Recorder { seen })),
            )
            .unwrap();

        for seq in 1..=50 {
            dispatcher.post_event(request(seq)).unwrap();
        }

        for expected in 1..=50 {
            match observed.recv_timeout(WAIT).unwrap() {
                ServiceEvent::Request(event) => assert_eq!(event.seq, expected),
                other => panic!("Unexpected event: {:?}", other),
            }
        }
        dispatcher.stop(Some(WAIT)).unwrap();
    }

    #[test]
    fn test_tasks_run_on_dispatcher_thread() {
        let dispatcher = Dispatcher::start("worker-thread", Some(WAIT)).unwrap();
        let (tx, rx) = std_mpsc::channel();
        dispatcher
            .execute(move || {
                let name = std::thread::current().name().map(str::to_string);
                let _ = tx.send(name);
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap().as_deref(), Some("worker-thread"));
    }

    #[test]
    fn test_unregistered_target_is_dropped() {
        let dispatcher = Dispatcher::start("no-listener", Some(WAIT)).unwrap();
        let response = ServiceEvent::Response(ResponseEvent::new(
            StubAddress::new("Chat", "main"),
            ProxyAddress::new("Chat", "main", "no-listener"),
            ResultKind::Ok,
            MessageId(0x2000),
            1,
            Payload::new(),
        ));
        dispatcher.post_event(response).unwrap();

        // the loop survives and keeps serving
        let (tx, rx) = std_mpsc::channel();
        dispatcher.execute(move || { let _ = tx.send(()); }).unwrap();
        assert!(rx.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn test_listener_removed_while_event_queued() {
        let dispatcher = Dispatcher::start("late-unregister", Some(WAIT)).unwrap();
        let handle = dispatcher.handle();
        let (seen, observed) = std_mpsc::channel();
        let registration = handle
            .register(
                &[EventKind::Request],
                stub_target(),
                Arc::new(Mutex::new(Recorder { seen })),
            )
            .unwrap();

        // unregister from inside the loop, then post: the event finds no listener
        let (done_tx, done_rx) = std_mpsc::channel();
        dispatcher
            .execute(move || {
                registration.release();
                let _ = done_tx.send(());
            })
            .unwrap();
        done_rx.recv_timeout(WAIT).unwrap();
        dispatcher.post_event(request(1)).unwrap();

        assert!(observed.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(handle.listeners().is_empty());
    }

    #[test]
    fn test_post_after_stop_fails() {
        let mut dispatcher = Dispatcher::start("stopped", Some(WAIT)).unwrap();
        let handle = dispatcher.handle();
        dispatcher.stop(Some(WAIT)).unwrap();
        assert!(!handle.is_running());
        assert!(matches!(
            handle.post_event(request(1)),
            Err(BusError::DispatcherClosed(_))
        ));
    }
}
