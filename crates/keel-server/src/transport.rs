use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::address::{Address, Authority};
use crate::codec::{self, Envelope, PREAMBLE};
use crate::error::{ServerError, ServerResult};
use crate::http::{self, HttpHandler, HttpHandlerMap, PrefixedIo};
use crate::retry::{Retryable, RetryStrategy};

pub(crate) type Deliver = Box<dyn Fn(Envelope) + Send + Sync>;
pub(crate) type LinkNotify = Box<dyn Fn(Address) + Send + Sync>;

struct LinkEntry {
    address: Address,
    notify: LinkNotify,
}

/// The process-wide message endpoint: one TCP listener shared by every
/// actor, lazily established outbound connections, and the link registry
/// that turns connection death into `Exited` notifications.
pub(crate) struct Transport {
    authority: OnceLock<Authority>,
    /// Wire routes for exposed actors, by actor name.
    routes: RwLock<HashMap<String, Deliver>>,
    /// Stop signals for every spawned actor, by actor name, for local links.
    stops: RwLock<HashMap<String, watch::Receiver<bool>>>,
    /// HTTP handlers by actor name and endpoint.
    http: RwLock<HashMap<String, HttpHandlerMap>>,
    /// Outbound connections by peer authority.
    peers: Mutex<HashMap<Authority, mpsc::UnboundedSender<Envelope>>>,
    links: Mutex<HashMap<Authority, Vec<LinkEntry>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub(crate) fn new() -> Self {
        Self {
            authority: OnceLock::new(),
            routes: RwLock::new(HashMap::new()),
            stops: RwLock::new(HashMap::new()),
            http: RwLock::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
        }
    }

    pub(crate) fn authority(&self) -> Authority {
        self.authority.get().cloned().unwrap_or_else(Authority::local)
    }

    pub(crate) async fn listen(self: &Arc<Self>, host: &str, port: u16) -> ServerResult<SocketAddr> {
        let listener = TcpListener::bind((host, port)).await?;
        let local = listener.local_addr()?;
        let authority = Authority {
            host: host.to_string(),
            port: local.port(),
        };
        self.authority
            .set(authority.clone())
            .map_err(|_| ServerError::InternalError("transport is already listening".to_string()))?;
        info!("transport listening on {authority}");
        let transport = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let transport = Arc::clone(&transport);
                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_inbound(transport, stream).await {
                                debug!("connection from {peer} ended: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("failed to accept connection: {e}");
                    }
                }
            }
        });
        if let Ok(mut slot) = self.listener.lock() {
            *slot = Some(task);
        }
        Ok(local)
    }

    pub(crate) fn register(&self, name: String, deliver: Deliver, stopped: watch::Receiver<bool>) {
        if let Ok(mut routes) = self.routes.write() {
            routes.insert(name.clone(), deliver);
        }
        if let Ok(mut stops) = self.stops.write() {
            stops.insert(name, stopped);
        }
    }

    pub(crate) fn register_stop(&self, name: String, stopped: watch::Receiver<bool>) {
        if let Ok(mut stops) = self.stops.write() {
            stops.entry(name).or_insert(stopped);
        }
    }

    pub(crate) fn register_http(&self, name: String, handlers: HttpHandlerMap) {
        if let Ok(mut http) = self.http.write() {
            http.insert(name, handlers);
        }
    }

    pub(crate) fn http_handler(&self, actor: &str, endpoint: &str) -> Option<HttpHandler> {
        self.http
            .read()
            .ok()
            .and_then(|http| http.get(actor).and_then(|m| m.get(endpoint)).cloned())
    }

    /// Route an envelope to its destination. Local destinations are
    /// delivered directly; remote ones are queued on the peer connection.
    pub(crate) fn post(self: &Arc<Self>, to: &Address, envelope: Envelope) {
        if to.authority.is_local() || to.authority == self.authority() {
            self.deliver(envelope);
        } else {
            let _ = self.ensure_peer(to.authority.clone()).send(envelope);
        }
    }

    fn deliver(&self, envelope: Envelope) {
        let Ok(routes) = self.routes.read() else {
            return;
        };
        match routes.get(&envelope.to) {
            Some(deliver) => deliver(envelope),
            None => {
                warn!(
                    "dropping '{}' message for unknown actor '{}'",
                    envelope.tag, envelope.to
                );
            }
        }
    }

    /// Subscribe to the death of the actor behind `address`. Local actors
    /// are watched through their stop signal; remote addresses are watched
    /// through the outbound connection, which is established if absent.
    pub(crate) fn link(self: &Arc<Self>, address: &Address, notify: LinkNotify) {
        if address.authority.is_local() || address.authority == self.authority() {
            let stopped = self
                .stops
                .read()
                .ok()
                .and_then(|stops| stops.get(&address.name).cloned());
            match stopped {
                Some(mut stopped) => {
                    let address = address.clone();
                    tokio::spawn(async move {
                        // An error means the actor task is gone, which
                        // counts as stopped as well.
                        let _ = stopped.wait_for(|x| *x).await;
                        notify(address);
                    });
                }
                None => notify(address.clone()),
            }
        } else {
            let authority = address.authority.clone();
            self.ensure_peer(authority.clone());
            if let Ok(mut links) = self.links.lock() {
                links.entry(authority).or_default().push(LinkEntry {
                    address: address.clone(),
                    notify,
                });
            }
        }
    }

    fn fire_links(&self, authority: &Authority) {
        let entries = match self.links.lock() {
            Ok(mut links) => links.remove(authority).unwrap_or_default(),
            Err(_) => return,
        };
        for entry in entries {
            (entry.notify)(entry.address);
        }
    }

    fn ensure_peer(self: &Arc<Self>, authority: Authority) -> mpsc::UnboundedSender<Envelope> {
        let mut peers = match self.peers.lock() {
            Ok(peers) => peers,
            Err(e) => e.into_inner(),
        };
        if let Some(sender) = peers.get(&authority) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        peers.insert(authority.clone(), sender.clone());
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = Self::run_peer(&authority, receiver).await {
                warn!("connection to {authority} lost: {e}");
            }
            if let Ok(mut peers) = transport.peers.lock() {
                peers.remove(&authority);
            }
            transport.fire_links(&authority);
        });
        sender
    }

    async fn run_peer(
        authority: &Authority,
        mut queue: mpsc::UnboundedReceiver<Envelope>,
    ) -> ServerResult<()> {
        let host = authority.host.clone();
        let port = authority.port;
        let stream = (|| TcpStream::connect((host.as_str(), port)))
            .retry(RetryStrategy::connect())
            .await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(&PREAMBLE).await?;
        let mut closed = Self::watch_for_close(read_half);
        loop {
            tokio::select! {
                envelope = queue.recv() => {
                    let Some(envelope) = envelope else {
                        return Ok(());
                    };
                    let frame = match codec::encode_frame(&envelope) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("dropping '{}' message for {authority}: {e}", envelope.tag);
                            continue;
                        }
                    };
                    write_half.write_all(&frame).await?;
                }
                _ = &mut closed => {
                    return Err(ServerError::ConnectionClosed);
                }
            }
        }
    }

    /// Resolve when the peer closes its end of the connection. Peers do
    /// not send data back on connections we opened, so any read completion
    /// means the connection is gone.
    fn watch_for_close(mut read_half: OwnedReadHalf) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                match tokio::io::AsyncReadExt::read(&mut read_half, &mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        })
    }

    async fn handle_inbound(transport: Arc<Self>, mut stream: TcpStream) -> ServerResult<()> {
        let mut preamble = [0u8; 4];
        match tokio::io::AsyncReadExt::read_exact(&mut stream, &mut preamble).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if preamble == PREAMBLE {
            let mut reader = tokio::io::BufReader::new(stream);
            while let Some(envelope) = codec::read_frame(&mut reader).await? {
                transport.deliver(envelope);
            }
            Ok(())
        } else {
            // Not our protocol; serve the connection as HTTP, replaying
            // the consumed bytes first.
            let io = PrefixedIo::new(preamble.to_vec(), stream);
            http::serve_http(transport, io).await;
            Ok(())
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(task) = listener.take() {
                task.abort();
            }
        }
    }
}
