//! Connection acceptance and the per-connection serve loop.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use beamrpc_common::codec::{read_handshake, CodecReader, CodecWriter, FrameReader, WireFormat};
use beamrpc_common::{Header, Result, RpcError};

use crate::service::Service;

type SharedWriter = Arc<Mutex<CodecWriter<OwnedWriteHalf>>>;

/// An RPC server: a concurrent map of registered services plus an accept
/// loop.
pub struct Server {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Server {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a built [`Service`]. Insert-once: a second service with
    /// the same name is an error.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.contains_key(service.name()) {
            return Err(RpcError::DuplicateService(service.name().to_string()));
        }
        for method in service.method_names() {
            info!(service = service.name(), method, "register method");
        }
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Resolves a dotted `"Service.Method"` name. The three failure modes
    /// (ill-formed name, unknown service, unknown method) are distinct
    /// errors.
    fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, String)> {
        let dot = service_method
            .rfind('.')
            .ok_or_else(|| RpcError::MalformedServiceMethod(service_method.to_string()))?;
        let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);

        let service = self
            .services
            .read()
            .unwrap()
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::UnknownService(service_name.to_string()))?;
        if service.method(method_name).is_none() {
            return Err(RpcError::UnknownMethod(method_name.to_string()));
        }
        Ok((service, method_name.to_string()))
    }

    /// Accepts connections forever, one task per connection. Returns only
    /// when the listener fails.
    pub async fn accept(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept error: {e}");
                    return Err(e.into());
                }
            };
            debug!(%peer, "connection established");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.serve_conn(stream).await;
            });
        }
    }

    /// Handshake, then the serve loop: read a header and body, resolve the
    /// method, and hand the request to a tracked handler task. Exits on the
    /// first header read error or the first failed response write, then
    /// waits for in-flight handlers before closing the connection.
    async fn serve_conn(self: Arc<Self>, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut frames = FrameReader::new(read_half);

        let handshake = match read_handshake(&mut frames).await {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!("rejecting connection: {e}");
                return;
            }
        };
        let format = handshake.codec_type;
        let handle_timeout = handshake.handle_timeout;

        let mut reader = CodecReader::from_frames(format, frames);
        let writer: SharedWriter = Arc::new(Mutex::new(CodecWriter::new(format, write_half)));
        // Raised by any handler whose response write fails; the write half
        // is dead at that point, so the whole connection gets dropped.
        let fatal = Arc::new(Notify::new());
        let mut handlers = JoinSet::new();

        loop {
            let header = tokio::select! {
                biased;
                _ = fatal.notified() => break,
                result = reader.read_header() => match result {
                    Ok(header) => header,
                    Err(e) => {
                        if !e.is_eof() {
                            warn!("read header error: {e}");
                        }
                        break;
                    }
                },
            };
            // The body frame is consumed even when resolution fails, so the
            // stream stays aligned for the next request.
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("read body error: {e}");
                    break;
                }
            };

            match self.find_service(&header.service_method) {
                Ok((service, method)) => {
                    handlers.spawn(handle_request(
                        service,
                        method,
                        header,
                        body,
                        format,
                        Arc::clone(&writer),
                        handle_timeout,
                        Arc::clone(&fatal),
                    ));
                }
                Err(e) => {
                    let mut reply = header;
                    reply.error = e.to_string();
                    send_response(&writer, &reply, &[], &fatal).await;
                }
            }
        }

        while handlers.join_next().await.is_some() {}
        let _ = writer.lock().await.shutdown().await;
        debug!("connection closed");
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one request to completion and writes the response.
///
/// The invocation itself runs in a detached task: when the handler timeout
/// fires, only the responder is unblocked - the method keeps running and
/// its eventual result is dropped.
async fn handle_request(
    service: Arc<Service>,
    method: String,
    mut header: Header,
    body: Vec<u8>,
    format: WireFormat,
    writer: SharedWriter,
    timeout: Duration,
    fatal: Arc<Notify>,
) {
    let invoke = match service.call(&method, format, body) {
        Ok(invoke) => invoke,
        Err(e) => {
            header.error = e.to_string();
            send_response(&writer, &header, &[], &fatal).await;
            return;
        }
    };

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(invoke.await);
    });

    let outcome = if timeout.is_zero() {
        rx.await
    } else {
        match tokio::time::timeout(timeout, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                header.error = format!("request handle timeout: expect within {timeout:?}");
                send_response(&writer, &header, &[], &fatal).await;
                return;
            }
        }
    };

    match outcome {
        Ok(Ok(reply)) => send_response(&writer, &header, &reply, &fatal).await,
        Ok(Err(e)) => {
            header.error = e.to_string();
            send_response(&writer, &header, &[], &fatal).await;
        }
        Err(_) => {
            header.error = format!("method {}.{method} aborted", service.name());
            send_response(&writer, &header, &[], &fatal).await;
        }
    }
}

/// Writes one response under the send lock. A write failure means the
/// connection's write half is gone: log it and raise the fatal signal so
/// the serve loop drops the connection.
async fn send_response(writer: &SharedWriter, header: &Header, body: &[u8], fatal: &Notify) {
    if let Err(e) = writer.lock().await.write_raw(header, body).await {
        error!("write response error: {e}");
        fatal.notify_one();
    }
}
