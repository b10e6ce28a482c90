//! DMAP legacy pairing
//!
//! The remote publishes a `_touch-remote._tcp` Bonjour service and runs
//! a small HTTP server. The device connects back with
//! `GET /pair?pairingcode=...&servicename=...` where the pairing code
//! is `md5(pairing_guid || pin)`; a matching code is answered with a
//! DMAP `cmpa` blob and produces a pairing GUID credential.

use super::codec::{DmapItem, DmapValue, encode};
use crate::error::{AtvError, Result};
use crate::mdns::announce_service;
use crate::types::credentials::DmapCredentials;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SERVICE_TYPE: &str = "_touch-remote._tcp.local";

/// Pairing server state shared with the accept loop.
pub(crate) struct Shared {
    pairing_guid: u64,
    pin: Mutex<Option<String>>,
    paired: AtomicBool,
    done: watch::Sender<bool>,
    remote_name: String,
}

/// DMAP pairing flow.
pub struct DmapPairing {
    shared: Arc<Shared>,
    done_rx: watch::Receiver<bool>,
    server: Option<JoinHandle<()>>,
    remote_name: String,
}

pub(crate) fn expected_code(pairing_guid: u64, pin: &str) -> String {
    let mut input = format!("{pairing_guid:016X}").into_bytes();
    input.extend_from_slice(pin.as_bytes());
    format!("{:X}", md5::compute(&input))
}

fn pairing_response(shared: &Shared) -> Vec<u8> {
    encode(&[DmapItem::new(
        b"cmpa",
        DmapValue::Container(vec![
            DmapItem::new(b"cmpg", DmapValue::UInt(shared.pairing_guid)),
            DmapItem::new(b"cmnm", DmapValue::Str(shared.remote_name.clone())),
            DmapItem::new(b"cmty", DmapValue::Str("iPhone".to_string())),
        ]),
    )])
}

async fn handle_request(shared: &Shared, request: &str) -> (u16, Vec<u8>) {
    // Request line: GET /pair?pairingcode=...&servicename=... HTTP/1.1
    let Some(query) = request
        .split_whitespace()
        .nth(1)
        .and_then(|path| path.split_once('?'))
        .map(|(_, q)| q)
    else {
        return (400, Vec::new());
    };
    let params: HashMap<&str, &str> = query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .collect();
    let Some(code) = params.get("pairingcode") else {
        return (400, Vec::new());
    };

    let pin = shared
        .pin
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    let Some(pin) = pin else {
        warn!("pairing request before PIN was provided");
        return (503, Vec::new());
    };

    if !code.eq_ignore_ascii_case(&expected_code(shared.pairing_guid, &pin)) {
        debug!("pairing code mismatch");
        return (404, Vec::new());
    }

    shared.paired.store(true, Ordering::SeqCst);
    let _ = shared.done.send(true);
    (200, pairing_response(shared))
}

async fn serve(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            let Ok(read) = socket.read(&mut buf).await else {
                return;
            };
            let request = String::from_utf8_lossy(&buf[..read]).into_owned();
            let (code, body) = handle_request(&shared, &request).await;
            let reason = match code {
                200 => "OK",
                404 => "Not Found",
                503 => "Service Unavailable",
                _ => "Bad Request",
            };
            let header = format!(
                "HTTP/1.1 {code} {reason}\r\nContent-Length: {}\r\nContent-Type: application/x-dmap-tagged\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(header.as_bytes()).await;
            let _ = socket.write_all(&body).await;
        });
    }
}

impl DmapPairing {
    /// Create a pairing flow with a fresh random GUID.
    #[must_use]
    pub fn new(remote_name: impl Into<String>) -> Self {
        let remote_name = remote_name.into();
        let (done, done_rx) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                pairing_guid: rand::random(),
                pin: Mutex::new(None),
                paired: AtomicBool::new(false),
                done,
                remote_name: remote_name.clone(),
            }),
            done_rx,
            server: None,
            remote_name,
        }
    }

    /// GUID that becomes the credential after pairing.
    #[must_use]
    pub fn pairing_guid(&self) -> u64 {
        self.shared.pairing_guid
    }

    /// Start the HTTP server and publish the Bonjour service.
    ///
    /// # Errors
    ///
    /// Returns an error when binding or announcing fails.
    pub async fn begin(&mut self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let port = listener.local_addr()?.port();

        let properties: HashMap<String, String> = [
            ("DvNm", self.remote_name.as_str()),
            ("RemV", "10000"),
            ("DvTy", "iPod"),
            ("RemN", "Remote"),
            ("txtvers", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain(std::iter::once((
            "Pair".to_string(),
            format!("{:016X}", self.shared.pairing_guid),
        )))
        .collect();

        announce_service(SERVICE_TYPE, &self.remote_name, port, properties).await?;
        self.server = Some(tokio::spawn(serve(listener, self.shared.clone())));
        Ok(())
    }

    /// Store the PIN the user chose on the device.
    pub fn pin(&self, code: &str) {
        *self
            .shared
            .pin
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(code.to_string());
    }

    /// Wait for the device to complete the pairing exchange.
    ///
    /// # Errors
    ///
    /// Returns [`AtvError::Pairing`] when the channel closes before the
    /// device pairs.
    pub async fn finish(&mut self) -> Result<DmapCredentials> {
        while !*self.done_rx.borrow() {
            self.done_rx
                .changed()
                .await
                .map_err(|_| AtvError::Pairing("pairing server stopped".to_string()))?;
        }
        Ok(DmapCredentials::PairingGuid(self.shared.pairing_guid))
    }

    /// True once the device has paired.
    #[must_use]
    pub fn has_paired(&self) -> bool {
        self.shared.paired.load(Ordering::SeqCst)
    }

    /// Stop the server.
    pub fn close(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

impl Drop for DmapPairing {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) use expected_code as pairing_code_for_tests;

#[cfg(test)]
impl DmapPairing {
    pub(crate) fn shared_for_tests(&self) -> Arc<Shared> {
        self.shared.clone()
    }
}

#[cfg(test)]
pub(crate) async fn serve_for_tests(listener: TcpListener, shared: Arc<Shared>) {
    serve(listener, shared).await;
}
