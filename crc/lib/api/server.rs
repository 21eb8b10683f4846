use std::{path::Path, sync::Arc};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{mpsc, OwnedSemaphorePermit, Semaphore},
};
use tokio_util::sync::CancellationToken;

use super::{encode_error, Command, Handler, Request};
use crate::{config::MUTATING_QUEUE_CAPACITY, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Largest request accepted on a connection.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

const READ_CHUNK_SIZE: usize = 4096;

/// Sent when the mutating queue is full.
pub const CAPACITY_REACHED: &str = "Sockets channel capacity reached, unable to add new request";

/// Sent to mutating requests that were still queued when the server stopped.
pub const SHUTTING_DOWN: &str = "API server is shutting down";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Serves the daemon API on a Unix socket.
///
/// `start`, `stop` and `delete` go through a bounded FIFO served by a single worker. Every other
/// command is answered on its own task as soon as it is read.
pub struct Server {
    listener: UnixListener,
    handler: Arc<Handler>,
    capacity: usize,
}

/// A mutating request waiting for the worker. The permit holds its queue slot.
struct Queued {
    request: Request,
    stream: UnixStream,
    _permit: OwnedSemaphorePermit,
}

/// The sending side of the mutating lane.
#[derive(Clone)]
struct MutatingLane {
    sender: mpsc::Sender<Queued>,
    slots: Arc<Semaphore>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Server {
    /// Binds `socket_path`, replacing a stale socket file.
    pub fn bind(socket_path: impl AsRef<Path>, handler: Handler) -> CrcResult<Self> {
        let socket_path = socket_path.as_ref();
        match std::fs::remove_file(socket_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| {
            CrcError::Api(format!("failed to create socket {}: {e}", socket_path.display()))
        })?;
        tracing::info!("listening on {}", socket_path.display());
        Ok(Self::from_listener(listener, handler))
    }

    /// Serves on an already bound listener.
    pub fn from_listener(listener: UnixListener, handler: Handler) -> Self {
        Self {
            listener,
            handler: Arc::new(handler),
            capacity: MUTATING_QUEUE_CAPACITY,
        }
    }

    /// Sets how many mutating requests may wait or run at once.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Accepts connections until `shutdown` fires.
    pub async fn serve(self, shutdown: CancellationToken) -> CrcResult<()> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let lane = MutatingLane {
            sender,
            slots: Arc::new(Semaphore::new(self.capacity)),
        };
        let worker = tokio::spawn(run_mutating_worker(
            self.handler.clone(),
            receiver,
            shutdown.clone(),
        ));

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    let handler = self.handler.clone();
                    let lane = lane.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, handler, lane, &shutdown).await
                    });
                }
                Err(e) => tracing::error!("accept error: {}", e),
            }
        }

        drop(lane);
        worker.await?;
        tracing::info!("API server stopped");
        Ok(())
    }
}

impl MutatingLane {
    /// Queues `request`, or answers it with the capacity error when every slot is taken.
    async fn enqueue(&self, request: Request, mut stream: UnixStream) {
        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            tracing::error!("channel capacity reached, unable to add new request");
            write_response(&mut stream, &encode_error(CAPACITY_REACHED)).await;
            return;
        };

        let queued = Queued {
            request,
            stream,
            _permit: permit,
        };
        if let Err(mpsc::error::SendError(mut queued)) = self.sender.send(queued).await {
            write_response(&mut queued.stream, &encode_error(SHUTTING_DOWN)).await;
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Serves queued requests in order until `shutdown` fires. The request being handled at that
/// point sees the cancellation and still gets its reply; the ones behind it are told the server
/// is going away.
async fn run_mutating_worker(
    handler: Arc<Handler>,
    mut receiver: mpsc::Receiver<Queued>,
    shutdown: CancellationToken,
) {
    loop {
        let queued = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            queued = receiver.recv() => queued,
        };
        let Some(mut queued) = queued else {
            break;
        };

        let response = handler.handle(queued.request, &shutdown).await;
        write_response(&mut queued.stream, &response).await;
    }

    receiver.close();
    while let Some(mut queued) = receiver.recv().await {
        tracing::debug!("rejecting queued {} request", queued.request.command);
        write_response(&mut queued.stream, &encode_error(SHUTTING_DOWN)).await;
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    handler: Arc<Handler>,
    lane: MutatingLane,
    shutdown: &CancellationToken,
) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("error decoding request: {}", e);
            write_response(&mut stream, &encode_error(&format!("Error decoding request: {e}"))).await;
            return;
        }
    };
    tracing::debug!("received request: {}", request.command);

    let mutating = Command::from_name(&request.command).is_some_and(|c| c.is_mutating());
    if mutating {
        lane.enqueue(request, stream).await;
    } else {
        let response = handler.handle(request, shutdown).await;
        write_response(&mut stream, &response).await;
    }
}

/// Reads bytes until they form one JSON request.
async fn read_request(stream: &mut UnixStream) -> CrcResult<Request> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = stream.read(&mut chunk).await?;
        buffer.extend_from_slice(&chunk[..read]);

        match serde_json::from_slice::<Request>(&buffer) {
            Ok(request) => return Ok(request),
            Err(e) if e.is_eof() && read > 0 && buffer.len() < MAX_REQUEST_SIZE => continue,
            Err(e) if read == 0 && buffer.is_empty() => {
                return Err(CrcError::Api(format!("empty request: {e}")))
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn write_response(stream: &mut UnixStream, response: &str) {
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::error!("failed writing response to socket: {}", e);
        return;
    }
    if let Err(e) = stream.shutdown().await {
        tracing::debug!("cannot shut down socket: {}", e);
    }
}
