//! One RPC connection: concurrent senders, a single receive loop, and the
//! pending-call table that joins them.
//!
//! Locking discipline: the send lock (a `tokio::sync::Mutex` around the
//! codec writer) serializes frame writes and is held while a call is
//! registered, so sequence numbers hit the wire in order with no gaps. The
//! state lock (a `std::sync::Mutex` around the call table) is never held
//! across an await and never around codec I/O. Termination takes the send
//! lock and then the state lock, so the receive loop's final updates are
//! visible before any caller observes the shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use beamrpc_common::codec::{CodecReader, CodecWriter, WireFormat};
use beamrpc_common::{Handshake, Header, Result, RpcError};

type CallReply = Result<Vec<u8>>;
type SharedWriter = Arc<Mutex<CodecWriter<OwnedWriteHalf>>>;
type SharedTable = Arc<StdMutex<CallTable>>;

struct CallTable {
    /// Next sequence number; starts at 1, 0 is reserved as invalid.
    seq: u64,
    pending: HashMap<u64, oneshot::Sender<CallReply>>,
    /// Set once by user close.
    closing: bool,
    /// Set once by a fatal transport error.
    shutdown: bool,
}

/// An in-flight request. Await it with [`wait`](Call::wait); dropping it
/// before completion evicts the pending entry, so a late server reply is
/// silently discarded.
pub struct Call {
    seq: u64,
    service_method: String,
    format: WireFormat,
    rx: oneshot::Receiver<CallReply>,
    table: SharedTable,
}

impl Call {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// A call that failed before it was ever registered.
    fn failed(service_method: &str, format: WireFormat, table: SharedTable, err: RpcError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self {
            seq: 0,
            service_method: service_method.to_string(),
            format,
            rx,
            table,
        }
    }

    /// Completion as raw reply bytes.
    pub async fn wait_raw(mut self) -> Result<Vec<u8>> {
        (&mut self.rx).await.map_err(|_| RpcError::Shutdown)?
    }

    /// Completion decoded into the reply type.
    pub async fn wait<R: DeserializeOwned>(self) -> Result<R> {
        let format = self.format;
        let reply = self.wait_raw().await?;
        format.decode(&reply)
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        if self.seq == 0 {
            return;
        }
        if let Ok(mut table) = self.table.lock() {
            table.pending.remove(&self.seq);
        }
    }
}

/// A client over one connection. Cheap to share behind an [`Arc`]; all
/// methods take `&self`.
pub struct Client {
    format: WireFormat,
    writer: SharedWriter,
    table: SharedTable,
}

impl Client {
    /// Builds a client on an established connection: sends the handshake
    /// (always JSON) and starts the receive loop.
    pub async fn new(stream: TcpStream, options: Handshake) -> Result<Self> {
        let format = options.codec_type;
        let (read_half, write_half) = stream.into_split();

        let mut writer = CodecWriter::new(format, write_half);
        writer.write_handshake(&options).await?;

        let table: SharedTable = Arc::new(StdMutex::new(CallTable {
            seq: 1,
            pending: HashMap::new(),
            closing: false,
            shutdown: false,
        }));
        let writer: SharedWriter = Arc::new(Mutex::new(writer));

        let reader = CodecReader::new(format, read_half);
        tokio::spawn(receive_loop(
            reader,
            Arc::clone(&table),
            Arc::clone(&writer),
        ));

        Ok(Self {
            format,
            writer,
            table,
        })
    }

    /// Connects to `addr` and builds a client, the whole sequence bounded
    /// by the handshake's connection timeout (zero means unbounded).
    pub async fn dial(addr: &str, options: Handshake) -> Result<Self> {
        dial_with(addr, options, Client::new).await
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Neither closed by the user nor shut down by a transport error.
    pub fn is_available(&self) -> bool {
        let table = self.table.lock().unwrap();
        !table.closing && !table.shutdown
    }

    /// Starts a call without waiting for the reply.
    pub async fn go<A: Serialize>(&self, service_method: &str, args: &A) -> Call {
        match self.format.encode(args) {
            Ok(body) => self.go_raw(service_method, body).await,
            Err(e) => Call::failed(service_method, self.format, Arc::clone(&self.table), e),
        }
    }

    /// [`go`](Self::go) with an already-encoded argument body.
    pub async fn go_raw(&self, service_method: &str, body: Vec<u8>) -> Call {
        let (tx, rx) = oneshot::channel();

        let mut writer = self.writer.lock().await;
        let seq = {
            let mut table = self.table.lock().unwrap();
            if table.closing || table.shutdown {
                drop(table);
                drop(writer);
                return Call::failed(
                    service_method,
                    self.format,
                    Arc::clone(&self.table),
                    RpcError::Shutdown,
                );
            }
            let seq = table.seq;
            table.seq += 1;
            table.pending.insert(seq, tx);
            seq
        };

        let header = Header::request(service_method, seq);
        if let Err(e) = writer.write_raw(&header, &body).await {
            // A write failure is fatal: the codec has already shut the
            // stream down, so no pending call can complete normally. The
            // send lock is still held, matching the terminate ordering.
            fail_pending(&mut self.table.lock().unwrap(), &e);
        }
        drop(writer);

        Call {
            seq,
            service_method: service_method.to_string(),
            format: self.format,
            rx,
            table: Arc::clone(&self.table),
        }
    }

    /// A blocking call: send, then wait for the reply. Wrap it in
    /// `tokio::time::timeout` (or use [`call_timeout`](Self::call_timeout))
    /// for a deadline; cancellation evicts the pending entry.
    pub async fn call<A: Serialize, R: DeserializeOwned>(
        &self,
        service_method: &str,
        args: &A,
    ) -> Result<R> {
        self.go(service_method, args).await.wait().await
    }

    /// [`call`](Self::call) with a raw body and raw reply, used by the
    /// broadcast fan-out which encodes once and decodes at most once.
    pub async fn call_raw(&self, service_method: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        self.go_raw(service_method, body).await.wait_raw().await
    }

    /// [`call`](Self::call) under a deadline. Zero means no deadline.
    pub async fn call_timeout<A: Serialize, R: DeserializeOwned>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R> {
        if timeout.is_zero() {
            return self.call(service_method, args).await;
        }
        match tokio::time::timeout(timeout, self.call(service_method, args)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::DeadlineExceeded),
        }
    }

    /// Closes the connection. The first close wins; every later call
    /// returns the shutdown error.
    pub async fn close(&self) -> Result<()> {
        {
            let mut table = self.table.lock().unwrap();
            if table.closing {
                return Err(RpcError::Shutdown);
            }
            table.closing = true;
        }
        self.writer.lock().await.shutdown().await
    }
}

/// Connects with a timeout covering both the TCP connect and the client
/// construction (handshake included). The constructor is injectable so the
/// timeout path is testable with a deliberately slow one.
async fn dial_with<F, Fut>(addr: &str, options: Handshake, new_client: F) -> Result<Client>
where
    F: FnOnce(TcpStream, Handshake) -> Fut,
    Fut: Future<Output = Result<Client>>,
{
    let connect_timeout = options.connect_timeout;
    let addr = addr.to_string();
    let connect = async move {
        let stream = TcpStream::connect(&addr).await?;
        new_client(stream, options).await
    };

    if connect_timeout.is_zero() {
        connect.await
    } else {
        match tokio::time::timeout(connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ConnectTimeout(connect_timeout)),
        }
    }
}

/// Reads replies until the stream fails, completing pending calls by
/// sequence number. Replies for evicted calls are drained and dropped.
async fn receive_loop(
    mut reader: CodecReader<OwnedReadHalf>,
    table: SharedTable,
    writer: SharedWriter,
) {
    let err = loop {
        let header = match reader.read_header().await {
            Ok(header) => header,
            Err(e) => break e,
        };
        let pending = table.lock().unwrap().pending.remove(&header.seq);
        match pending {
            // Nobody is waiting: the call was evicted (deadline, cancel)
            // or the write failed after registration. Drain the body.
            None => {
                if let Err(e) = reader.read_body().await {
                    break e;
                }
            }
            Some(tx) if !header.error.is_empty() => {
                let drained = reader.read_body().await;
                let _ = tx.send(Err(RpcError::Method(header.error)));
                if let Err(e) = drained {
                    break e;
                }
            }
            Some(tx) => match reader.read_body().await {
                Ok(body) => {
                    let _ = tx.send(Ok(body));
                }
                Err(e) => {
                    let _ = tx.send(Err(RpcError::Connection(e.to_string())));
                    break e;
                }
            },
        }
    };

    if !err.is_eof() {
        debug!("receive loop ended: {err}");
    }
    terminate_calls(&table, &writer, err).await;
}

/// Marks the connection shut down and completes every pending call with
/// the fatal error. Takes the send lock first, then the state lock.
async fn terminate_calls(table: &SharedTable, writer: &SharedWriter, err: RpcError) {
    let _send = writer.lock().await;
    fail_pending(&mut table.lock().unwrap(), &err);
}

/// Shared tail of [`terminate_calls`] and the send-failure path in
/// [`Client::go_raw`]. The caller must hold the send lock.
fn fail_pending(table: &mut CallTable, err: &RpcError) {
    table.shutdown = true;
    let message = err.to_string();
    for (_, tx) in table.pending.drain() {
        let _ = tx.send(Err(RpcError::Connection(message.clone())));
    }
}
