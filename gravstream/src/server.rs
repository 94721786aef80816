use std::{
    collections::HashMap,
    io::{self, BufWriter, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    body::Body,
    error::ProtocolError,
    protocol::{self, Code},
    snapshot::SnapshotStore,
};

/// How the [`Server`] hands the bodies to its viewers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServeMode {
    /// Every [`Code::RequestBodyData`] is answered with the latest bodies.
    Pull,
    /// Like [`ServeMode::Pull`], but a viewer that already received the latest publication is
    /// answered with an empty array.
    ChangeGated,
    /// The latest bodies are sent to every connected viewer at a fixed interval.
    Push {
        /// Time between two frames.
        interval: Duration,
    },
}

/// Distribution server serving the content of a [`SnapshotStore`] to remote viewers.
///
/// The server only ever reads copies from the store: slow or misbehaving viewers never hold up
/// the simulation, and a failing connection is dropped without affecting the others.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    store: Arc<SnapshotStore>,
    mode: ServeMode,
}

impl Server {
    /// Binds a new [`Server`] to the given address.
    pub fn bind(
        addr: impl ToSocketAddrs,
        store: Arc<SnapshotStore>,
        mode: ServeMode,
    ) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            store,
            mode,
        })
    }

    /// Returns the address the server listens on.
    #[inline]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves viewers on a background thread.
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let accept = thread::Builder::new()
            .name("gravstream-accept".to_owned())
            .spawn(move || self.run())?;

        Ok(ServerHandle { local_addr, accept })
    }

    /// Accepts and serves viewers on the current thread, forever.
    pub fn run(self) {
        let Self {
            listener,
            store,
            mode,
        } = self;

        log::info!(
            "Serving bodies on {} in {:?} mode",
            listener
                .local_addr()
                .map_or_else(|e| e.to_string(), |a| a.to_string()),
            mode
        );

        let broadcaster = match mode {
            ServeMode::Push { interval } => match Broadcaster::spawn(store.clone(), interval) {
                Ok(events) => Some(events),
                Err(e) => {
                    log::error!("Unable to start the broadcaster: {e}");
                    return;
                }
            },
            _ => None,
        };

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("Failed to accept a connection: {e}");
                    continue;
                }
            };

            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    log::warn!("Dropping connection with unknown peer: {e}");
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                log::warn!("Unable to disable Nagle's algorithm for {peer}: {e}");
            }

            log::info!("Viewer {peer} connected");

            match &broadcaster {
                Some(events) => {
                    if events.send(Event::Connected(stream, peer)).is_err() {
                        log::error!("Broadcaster stopped, no longer accepting viewers");
                        return;
                    }
                }
                None => {
                    let store = store.clone();
                    let gated = mode == ServeMode::ChangeGated;

                    let spawned = thread::Builder::new()
                        .name(format!("gravstream-viewer-{peer}"))
                        .spawn(move || {
                            log_closed(peer, serve_requests(&stream, &store, gated));
                        });

                    if let Err(e) = spawned {
                        log::warn!("Unable to serve viewer {peer}: {e}");
                    }
                }
            }
        }
    }
}

/// Handle to a [`Server`] running on a background thread.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
}

impl ServerHandle {
    /// Returns the address the server listens on.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns `true` while the server accepts connections.
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.accept.is_finished()
    }
}

fn log_closed(peer: SocketAddr, result: Result<(), ProtocolError>) {
    match result {
        Ok(()) => log::info!("Viewer {peer} disconnected"),
        Err(e) if e.is_disconnect() => log::info!("Viewer {peer} closed the connection"),
        Err(e) => log::warn!("Dropping viewer {peer}: {e}"),
    }
}

fn serve_requests(
    stream: &TcpStream,
    store: &SnapshotStore,
    gated: bool,
) -> Result<(), ProtocolError> {
    let mut reader = stream;
    let mut writer = BufWriter::new(stream);
    let mut seen = 0;

    loop {
        let raw = protocol::read_code(&mut reader)?;

        match Code::try_from(raw) {
            Ok(Code::RequestBodyData) => {
                let bodies = if gated {
                    store.read_since(seen).map_or_else(Vec::new, |snapshot| {
                        seen = snapshot.generation;
                        snapshot.bodies
                    })
                } else {
                    store.read_copy()
                };

                protocol::write_bodies(&mut writer, &bodies)?;
                writer.flush()?;
            }
            Ok(Code::SignalClientDisconnect) => return Ok(()),
            _ => log::warn!("Ignoring request code {raw}"),
        }
    }
}

enum Event {
    Connected(TcpStream, SocketAddr),
    Closed(u64),
}

struct Subscriber {
    peer: SocketAddr,
    frames: flume::Sender<Arc<[Body]>>,
}

// Sole owner of the subscribed connections: new viewers and closed connections are reported to it
// as events, so the list is never shared.
struct Broadcaster {
    store: Arc<SnapshotStore>,
    interval: Duration,
    events: flume::Sender<Event>,
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
}

impl Broadcaster {
    fn spawn(store: Arc<SnapshotStore>, interval: Duration) -> io::Result<flume::Sender<Event>> {
        let (events, receiver) = flume::unbounded();

        let mut broadcaster = Self {
            store,
            interval,
            events: events.clone(),
            subscribers: HashMap::new(),
            next_id: 0,
        };

        thread::Builder::new()
            .name("gravstream-broadcast".to_owned())
            .spawn(move || broadcaster.run(receiver))?;

        Ok(events)
    }

    fn run(&mut self, receiver: flume::Receiver<Event>) {
        let mut deadline = Instant::now() + self.interval;

        loop {
            match receiver.recv_deadline(deadline) {
                Ok(Event::Connected(stream, peer)) => self.subscribe(stream, peer),
                Ok(Event::Closed(id)) => {
                    if let Some(subscriber) = self.subscribers.remove(&id) {
                        log::info!("Viewer {} unsubscribed", subscriber.peer);
                    }
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    self.broadcast();

                    let now = Instant::now();
                    deadline += self.interval;
                    if deadline < now {
                        deadline = now + self.interval;
                    }
                }
                Err(flume::RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn broadcast(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }

        let frame: Arc<[Body]> = self.store.read_copy().into();

        self.subscribers.retain(|_, subscriber| {
            match subscriber.frames.try_send(frame.clone()) {
                // The viewer is still busy with the previous frame, it skips this one.
                Ok(()) | Err(flume::TrySendError::Full(_)) => true,
                Err(flume::TrySendError::Disconnected(_)) => {
                    log::info!("Dropping viewer {}", subscriber.peer);
                    false
                }
            }
        });
    }

    fn subscribe(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;

        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("Unable to subscribe viewer {peer}: {e}");
                return;
            }
        };

        let (frames, queue) = flume::bounded(1);
        let events = self.events.clone();

        let writer = thread::Builder::new()
            .name(format!("gravstream-push-{peer}"))
            .spawn(move || {
                let result = write_frames(&stream, queue);
                let _ = stream.shutdown(Shutdown::Both);
                if let Err(e) = result {
                    log_closed(peer, Err(e));
                }
            });

        let watcher = writer.and_then(|_| {
            thread::Builder::new()
                .name(format!("gravstream-watch-{peer}"))
                .spawn(move || {
                    log_closed(peer, watch_disconnect(&reader));
                    let _ = events.send(Event::Closed(id));
                })
        });

        match watcher {
            Ok(_) => {
                self.subscribers.insert(id, Subscriber { peer, frames });
            }
            Err(e) => log::warn!("Unable to subscribe viewer {peer}: {e}"),
        }
    }
}

fn write_frames(
    stream: &TcpStream,
    queue: flume::Receiver<Arc<[Body]>>,
) -> Result<(), ProtocolError> {
    let mut writer = BufWriter::new(stream);

    for frame in queue.iter() {
        protocol::write_frame(&mut writer, &frame)?;
    }

    Ok(())
}

fn watch_disconnect(stream: &TcpStream) -> Result<(), ProtocolError> {
    let mut reader = stream;

    loop {
        let raw = protocol::read_code(&mut reader)?;

        match Code::try_from(raw) {
            Ok(Code::SignalClientDisconnect) => return Ok(()),
            _ => log::warn!("Ignoring code {raw} from a subscribed viewer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{body::Vec3, client::Client};

    const LIMIT: u32 = 1 << 10;

    fn bodies(count: usize) -> Vec<Body> {
        (0..count)
            .map(|i| Body::new(Vec3::new(i as f64, 0.5, -1.0), 2.0))
            .collect()
    }

    fn serve(mode: ServeMode) -> (Arc<SnapshotStore>, ServerHandle) {
        let store = Arc::new(SnapshotStore::new());
        let server = Server::bind("127.0.0.1:0", store.clone(), mode).unwrap();

        (store, server.spawn().unwrap())
    }

    #[test]
    fn pull_serves_latest_bodies() {
        let (store, server) = serve(ServeMode::Pull);
        let mut client = Client::connect(server.local_addr(), LIMIT).unwrap();

        assert!(client.request_bodies().unwrap().is_empty());

        store.publish(&bodies(5));
        assert_eq!(client.request_bodies().unwrap(), bodies(5));
        assert_eq!(client.request_bodies().unwrap(), bodies(5));

        client.disconnect().unwrap();
        assert!(server.is_running());
    }

    #[test]
    fn change_gated_serves_each_publication_once() {
        let (store, server) = serve(ServeMode::ChangeGated);
        let mut first = Client::connect(server.local_addr(), LIMIT).unwrap();

        assert!(first.request_bodies().unwrap().is_empty());

        store.publish(&bodies(3));
        assert_eq!(first.request_bodies().unwrap(), bodies(3));
        assert!(first.request_bodies().unwrap().is_empty());

        // Each connection keeps track of its own last publication.
        let mut second = Client::connect(server.local_addr(), LIMIT).unwrap();
        assert_eq!(second.request_bodies().unwrap(), bodies(3));

        store.publish(&bodies(4));
        assert_eq!(first.request_bodies().unwrap(), bodies(4));
        assert_eq!(second.request_bodies().unwrap(), bodies(4));
    }

    #[test]
    fn unknown_codes_are_ignored() {
        let (store, server) = serve(ServeMode::Pull);
        store.publish(&bodies(2));

        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(&99u32.to_ne_bytes()).unwrap();
        protocol::write_code(&mut stream, Code::RequestBodyData).unwrap();

        assert_eq!(protocol::read_bodies(&mut stream, LIMIT).unwrap(), bodies(2));
    }

    #[test]
    fn push_reaches_every_subscriber() {
        let (store, server) = serve(ServeMode::Push {
            interval: Duration::from_millis(5),
        });
        store.publish(&bodies(6));

        let mut leaving = Client::connect(server.local_addr(), LIMIT).unwrap();
        let mut staying = Client::connect(server.local_addr(), LIMIT).unwrap();

        assert_eq!(leaving.next_frame().unwrap(), bodies(6));
        assert_eq!(staying.next_frame().unwrap(), bodies(6));

        leaving.disconnect().unwrap();

        store.publish(&bodies(7));
        let frame = (0..100)
            .map(|_| staying.next_frame().unwrap())
            .find(|frame| frame.len() == 7);
        assert_eq!(frame, Some(bodies(7)));
    }
}
