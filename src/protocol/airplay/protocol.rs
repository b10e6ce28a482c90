//! AirPlay playback client: URL playback and rate control

use super::auth::LegacyVerifier;
use crate::error::{AtvError, Result};
use crate::net::{HttpConnection, HttpRequest};
use crate::types::{Credentials, LegacyCredentials};
use std::net::SocketAddr;
use tracing::debug;

/// Client for the AirPlay HTTP endpoint (video and app playback).
pub struct AirPlayClient {
    connection: HttpConnection,
    session_id: String,
}

impl AirPlayClient {
    /// Connect, running legacy device authentication when the stored
    /// credentials are of that kind.
    ///
    /// # Errors
    ///
    /// Fails with [`AtvError::DeviceAuthRequired`] when authentication
    /// is required and rejected or missing.
    pub async fn connect(
        remote: SocketAddr,
        credentials: Option<&Credentials>,
        device_auth_required: bool,
    ) -> Result<Self> {
        let mut connection = HttpConnection::connect(remote).await?;

        match credentials {
            Some(Credentials::Legacy(legacy)) => {
                LegacyVerifier::new(legacy.clone())
                    .verify(&mut connection)
                    .await?;
                debug!("legacy device authentication complete");
            }
            Some(_) => {}
            None if device_auth_required => return Err(AtvError::DeviceAuthRequired),
            None => {}
        }

        Ok(Self {
            connection,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Same, but for pre-parsed legacy credentials.
    ///
    /// # Errors
    ///
    /// See [`AirPlayClient::connect`].
    pub async fn connect_legacy(
        remote: SocketAddr,
        credentials: &LegacyCredentials,
    ) -> Result<Self> {
        Self::connect(
            remote,
            Some(&Credentials::Legacy(credentials.clone())),
            true,
        )
        .await
    }

    fn base(&self, method: &str, path: &str) -> HttpRequest {
        HttpRequest::http(method, path)
            .with_header("User-Agent", "MediaControl/1.0")
            .with_header("X-Apple-Session-ID", self.session_id.clone())
    }

    /// Start playing a URL on the device.
    ///
    /// # Errors
    ///
    /// Fails when the device rejects playback.
    pub async fn play_url(&mut self, url: &str, position: f64) -> Result<()> {
        let body = format!("Content-Location: {url}\nStart-Position: {position}\n");
        let request = self
            .base("POST", "/play")
            .with_header("Content-Type", "text/parameters")
            .with_body(body.into_bytes());
        let response = self.connection.send(&request).await?;
        if !response.is_ok() {
            return Err(AtvError::Command {
                error_code: i32::from(response.code),
                handler_status: 0,
            });
        }
        Ok(())
    }

    /// Set the playback rate (0 pauses, 1 plays).
    ///
    /// # Errors
    ///
    /// Fails when the device rejects the request.
    pub async fn set_rate(&mut self, rate: f32) -> Result<()> {
        let request = self.base("POST", &format!("/rate?value={rate:.6}"));
        let response = self.connection.send(&request).await?;
        if !response.is_ok() {
            return Err(AtvError::Command {
                error_code: i32::from(response.code),
                handler_status: 0,
            });
        }
        Ok(())
    }

    /// Stop video playback.
    ///
    /// # Errors
    ///
    /// Fails when the device rejects the request.
    pub async fn stop(&mut self) -> Result<()> {
        let request = self.base("POST", "/stop");
        self.connection.send(&request).await?;
        Ok(())
    }
}
