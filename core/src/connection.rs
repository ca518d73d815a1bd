/// Connection manager: owns the single transport connection of the process
use crate::bus::{EventBus, TransportEvent};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::protocol::{ClientAction, Frame, ServerEvent};
use crate::session::SessionIdentity;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection state of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected (initial failure, lost, or released)
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Stream established and `join` written
    Connected,
}

/// State shared between a `Connection` handle and its transport task
struct Link {
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
}

impl Link {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            bus: EventBus::new(),
            state,
        }
    }

    /// Move to `next`; listeners hear about connect/disconnect only on a real change.
    fn transition(&self, next: ConnectionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            match next {
                ConnectionState::Connected => {
                    self.bus.dispatch(&TransportEvent::Connected);
                }
                ConnectionState::Disconnected => {
                    self.bus.dispatch(&TransportEvent::Disconnected);
                }
                ConnectionState::Connecting => {}
            }
        }
        changed
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle to the transport. Cheap to share behind an `Arc`; every component
/// other than the manager only reads state, attaches listeners, or emits.
pub struct Connection {
    id: Uuid,
    user_id: String,
    link: Arc<Link>,
    outbound: mpsc::UnboundedSender<ClientAction>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Start connecting in the background on `runtime`
    fn open(config: &Config, session: &SessionIdentity, runtime: &Handle) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Link::new());
        link.transition(ConnectionState::Connecting);

        let task = runtime.spawn(run_transport(
            config.server_addr.clone(),
            config.connection_timeout,
            session.id.clone(),
            link.clone(),
            outbound_rx,
        ));

        Self {
            id: Uuid::new_v4(),
            user_id: session.id.clone(),
            link,
            outbound,
            task: Mutex::new(Some(task)),
        }
    }

    /// A connection with no transport task; tests drive its state and bus by hand.
    #[cfg(test)]
    pub(crate) fn detached(user_id: &str) -> (Self, mpsc::UnboundedReceiver<ClientAction>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            link: Arc::new(Link::new()),
            outbound,
            task: Mutex::new(None),
        };
        (conn, outbound_rx)
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: ConnectionState) {
        self.link.transition(state);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The user this connection joined as
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.link.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.state.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.link.bus
    }

    /// Queue an action for the transport. Fails without writing anything
    /// when the transport is not connected.
    pub fn emit(&self, action: ClientAction) -> Result<()> {
        if !self.is_connected() {
            return Err(ChatError::NotConnected);
        }
        self.outbound
            .send(action)
            .map_err(|_| ChatError::NotConnected)
    }

    /// Stop the transport task and report the disconnect
    fn close(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        self.link.transition(ConnectionState::Disconnected);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish()
    }
}

async fn connect(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            ChatError::Timeout(format!("connecting to {} after {:?}", addr, connect_timeout))
        })??;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY: {}", e);
    }
    Ok(stream)
}

async fn write_action(writer: &mut OwnedWriteHalf, action: &ClientAction) -> Result<()> {
    let frame = Frame::from_action(action)?;
    frame.write_to(writer).await
}

/// Transport task: connect, announce ourselves, then pump frames both ways
/// until either side fails.
async fn run_transport(
    addr: String,
    connect_timeout: Duration,
    user_id: String,
    link: Arc<Link>,
    mut outbound: mpsc::UnboundedReceiver<ClientAction>,
) {
    let stream = match connect(&addr, connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to connect to {}: {}", addr, e);
            link.transition(ConnectionState::Disconnected);
            return;
        }
    };

    let (mut reader, mut writer) = stream.into_split();

    // `join` is always the first frame on the stream
    if let Err(e) = write_action(&mut writer, &ClientAction::Join(user_id.clone())).await {
        warn!("Failed to send join to {}: {}", addr, e);
        link.transition(ConnectionState::Disconnected);
        return;
    }

    info!("Connected to {} as {}", addr, user_id);
    link.transition(ConnectionState::Connected);

    let mut writer_task = AbortOnDrop(tokio::spawn(async move {
        while let Some(action) = outbound.recv().await {
            if let Err(e) = write_action(&mut writer, &action).await {
                warn!("Failed to write {}: {}", action, e);
                break;
            }
        }
    }));

    loop {
        tokio::select! {
            read = Frame::read_from(&mut reader) => match read {
                Ok(Some(frame)) => match ServerEvent::from_bytes(&frame.payload) {
                    Ok(event) => {
                        link.bus.dispatch(&TransportEvent::Server(event));
                    }
                    Err(e) => debug!("Skipping undecodable frame ({} bytes): {}", frame.length, e),
                },
                Ok(None) => {
                    info!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    warn!("Transport read error: {}", e);
                    break;
                }
            },
            _ = &mut writer_task.0 => {
                debug!("Writer stopped, closing transport");
                break;
            }
        }
    }

    drop(writer_task);
    info!("Disconnected from {}", addr);
    link.transition(ConnectionState::Disconnected);
}

static GLOBAL: OnceLock<ConnectionManager> = OnceLock::new();

/// Lazy, process-wide owner of the one transport connection.
#[derive(Debug)]
pub struct ConnectionManager {
    config: Config,
    slot: Mutex<Option<Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
        }
    }

    /// Install the process-wide manager with explicit config. The first
    /// initialization wins; later calls return the existing manager.
    pub fn init_global(config: Config) -> &'static ConnectionManager {
        GLOBAL.get_or_init(|| ConnectionManager::new(config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the live connection, creating and connecting one if there is none.
    ///
    /// A connection that is connecting or connected is returned as is. One
    /// that has dropped to `Disconnected` is closed and replaced, so at most
    /// one transport exists at any time.
    ///
    /// The transport task runs on the current Tokio runtime; calling this
    /// outside one fails with `ChatError::Runtime`.
    pub fn acquire(&self, session: &SessionIdentity) -> Result<Arc<Connection>> {
        let runtime = Handle::try_current().map_err(|e| ChatError::Runtime(e.to_string()))?;
        let mut slot = self.slot();

        if let Some(existing) = slot.as_ref() {
            if existing.state() != ConnectionState::Disconnected {
                if existing.user_id() != session.id {
                    warn!(
                        "Connection already joined as {}, ignoring acquire for {}",
                        existing.user_id(),
                        session.id
                    );
                }
                return Ok(existing.clone());
            }
            debug!("Replacing dead connection {}", existing.id());
            existing.close();
        }

        let conn = Arc::new(Connection::open(&self.config, session, &runtime));
        info!("Opening connection {} to {}", conn.id(), self.config.server_addr);
        *slot = Some(conn.clone());
        Ok(conn)
    }

    pub fn current(&self) -> Option<Arc<Connection>> {
        self.slot().clone()
    }

    /// Disconnect and forget the connection. No-op when already released.
    pub fn release(&self) -> bool {
        let released = self.slot().take();
        match released {
            Some(conn) => {
                info!("Releasing connection {}", conn.id());
                conn.close();
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot()
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }
}
