//! DAAP/DACP session: login, commands and play status

use super::codec::{DmapItem, DmapLookup, decode};
use crate::error::{AtvError, Result};
use crate::net::{HttpConnection, HttpRequest, HttpResponse};
use crate::types::credentials::DmapCredentials;
use crate::types::{DeviceState, MediaType, PlayingState, RepeatState, ShuffleState};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

/// Headers required on every DMAP request.
const DMAP_HEADERS: [(&str, &str); 7] = [
    ("Accept", "*/*"),
    ("Accept-Encoding", "gzip"),
    ("Client-DAAP-Version", "3.12"),
    ("Client-ATV-Sharing-Version", "1.2"),
    ("Client-iTunes-Sharing-Version", "3.10"),
    (
        "User-Agent",
        "TVRemote/186 CFNetwork/808.1.4 Darwin/16.1.0",
    ),
    ("Viewer-Only-Client", "1"),
];

const MAX_RETRIES: u32 = 3;

/// One logged-in DAAP control session.
pub struct DmapClient {
    connection: HttpConnection,
    credentials: Option<DmapCredentials>,
    session_id: Option<u32>,
}

fn apply_headers(mut request: HttpRequest) -> HttpRequest {
    for (name, value) in DMAP_HEADERS {
        request = request.with_header(name, value);
    }
    request
}

impl DmapClient {
    /// Connect to a DMAP endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error when the TCP connection fails.
    pub async fn connect(
        remote: SocketAddr,
        credentials: Option<DmapCredentials>,
    ) -> Result<Self> {
        Ok(Self {
            connection: HttpConnection::connect(remote).await?,
            credentials,
            session_id: None,
        })
    }

    /// Perform login and remember the session id from `mlid`.
    ///
    /// # Errors
    ///
    /// Fails with [`AtvError::Authentication`] when the device rejects
    /// the credentials.
    pub async fn login(&mut self) -> Result<u32> {
        let path = match &self.credentials {
            Some(DmapCredentials::PairingGuid(guid)) => {
                format!("/login?pairing-guid=0x{guid:016X}&hasFP=1")
            }
            Some(DmapCredentials::Hsgid(hsgid)) => format!("/login?hsgid={hsgid}&hasFP=1"),
            None => "/login?hasFP=1".to_string(),
        };

        let response = self.get_retry(&path, crate::net::REPLY_TIMEOUT).await?;
        if response.code == 401 || response.code == 403 {
            return Err(AtvError::auth(format!("login rejected ({})", response.code)));
        }

        let items = decode(&response.body).map_err(|e| AtvError::Protocol(e.to_string()))?;
        let session_id = items
            .uint_at(&[b"mlog", b"mlid"])
            .ok_or_else(|| AtvError::Protocol("login response without mlid".to_string()))?;
        #[allow(clippy::cast_possible_truncation)]
        let session_id = session_id as u32;

        debug!("DMAP login established session {session_id}");
        self.session_id = Some(session_id);
        Ok(session_id)
    }

    fn session_id(&self) -> Result<u32> {
        self.session_id
            .ok_or_else(|| AtvError::Protocol("not logged in".to_string()))
    }

    async fn get_retry(&mut self, path: &str, timeout: Duration) -> Result<HttpResponse> {
        let mut attempt = 0;
        loop {
            let request = apply_headers(HttpRequest::http("GET", path));
            match self.connection.send_with_timeout(&request, timeout).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(err.into());
                    }
                    debug!("retrying DMAP request after error: {err}");
                }
            }
        }
    }

    async fn post(&mut self, path: &str, body: Vec<u8>) -> Result<HttpResponse> {
        let request = apply_headers(HttpRequest::http("POST", path))
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(body);
        Ok(self.connection.send(&request).await?)
    }

    /// Run a `ctrl-int` command, e.g. `play` or `nextitem`.
    ///
    /// # Errors
    ///
    /// Fails when not logged in or when the device reports an error.
    pub async fn command(&mut self, command: &str) -> Result<()> {
        let session_id = self.session_id()?;
        let path = format!("/ctrl-int/1/{command}?session-id={session_id}&prompt-id=0");
        let response = self.post(&path, Vec::new()).await?;
        Self::check(&response)
    }

    /// Set a DACP property, e.g. `dacp.playingtime`.
    ///
    /// # Errors
    ///
    /// Fails when not logged in or when the device reports an error.
    pub async fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        let session_id = self.session_id()?;
        let path = format!("/ctrl-int/1/setproperty?{key}={value}&session-id={session_id}");
        let response = self.post(&path, Vec::new()).await?;
        Self::check(&response)
    }

    /// Send a control prompt entry (select/menu/topmenu and the touch
    /// sequences emulating arrow keys).
    ///
    /// # Errors
    ///
    /// Fails when not logged in or when the device reports an error.
    pub async fn control_prompt(&mut self, entry: &str) -> Result<()> {
        let session_id = self.session_id()?;
        let path = format!("/ctrl-int/1/controlpromptentry?session-id={session_id}&prompt-id=0");
        let body = format!("cmbe={entry}&cmcc=0").into_bytes();
        let response = self.post(&path, body).await?;
        Self::check(&response)
    }

    /// Emulated directional swipe: touch down, a few moves, touch up.
    ///
    /// # Errors
    ///
    /// Fails when any prompt entry is rejected.
    pub async fn touch_swipe(&mut self, from: (i32, i32), to: (i32, i32)) -> Result<()> {
        const STEPS: i32 = 5;
        self.control_prompt(&format!("touchDown&time=0&point={},{}", from.0, from.1))
            .await?;
        for step in 1..=STEPS {
            let x = from.0 + (to.0 - from.0) * step / STEPS;
            let y = from.1 + (to.1 - from.1) * step / STEPS;
            self.control_prompt(&format!("touchMove&time={step}&point={x},{y}"))
                .await?;
        }
        self.control_prompt(&format!(
            "touchUp&time={}&point={},{}",
            STEPS + 1,
            to.0,
            to.1
        ))
        .await
    }

    /// Long-poll `playstatusupdate` at a revision.
    ///
    /// Blocks until the device revision changes or `timeout` expires.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and malformed payloads.
    pub async fn play_status(
        &mut self,
        revision: u32,
        timeout: Duration,
    ) -> Result<(PlayingState, u32)> {
        let session_id = self.session_id()?;
        let path = format!(
            "/ctrl-int/1/playstatusupdate?revision-number={revision}&session-id={session_id}"
        );
        let request = apply_headers(HttpRequest::http("GET", path));
        let response = self
            .connection
            .send_with_timeout(&request, timeout)
            .await?;
        Self::check(&response)?;

        let items = decode(&response.body).map_err(|e| AtvError::Protocol(e.to_string()))?;
        Ok(parse_play_status(&items))
    }

    /// Fetch artwork for the playing item.
    ///
    /// Width/height hints bound the image size; the device keeps aspect
    /// ratio. Defaults cover a 16:9 screen when no hint is given.
    ///
    /// # Errors
    ///
    /// Fails when no artwork is available.
    pub async fn artwork(
        &mut self,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(Vec<u8>, String)> {
        let session_id = self.session_id()?;
        let path = format!(
            "/ctrl-int/1/nowplayingartwork?mw={}&mh={}&session-id={session_id}",
            width.unwrap_or(1024),
            height.unwrap_or(576),
        );
        let response = self.get_retry(&path, crate::net::REPLY_TIMEOUT).await?;
        if !response.is_ok() || response.body.is_empty() {
            return Err(AtvError::Protocol("no artwork available".to_string()));
        }
        let mimetype = response
            .headers
            .get("content-type")
            .unwrap_or("image/jpeg")
            .to_string();
        Ok((response.body, mimetype))
    }

    /// Read the current volume in percent.
    ///
    /// # Errors
    ///
    /// Fails when the device does not report `dmcp.volume`.
    pub async fn volume(&mut self) -> Result<f32> {
        let session_id = self.session_id()?;
        let path = format!(
            "/ctrl-int/1/getproperty?properties=dmcp.volume&session-id={session_id}"
        );
        let response = self.get_retry(&path, crate::net::REPLY_TIMEOUT).await?;
        let items = decode(&response.body).map_err(|e| AtvError::Protocol(e.to_string()))?;
        items
            .uint_at(&[b"cmst", b"cmvo"])
            .or_else(|| items.uint_at(&[b"cmvo"]))
            .map(|v| {
                #[allow(clippy::cast_precision_loss)]
                let v = v as f32;
                v.clamp(0.0, 100.0)
            })
            .ok_or_else(|| AtvError::Protocol("volume not reported".to_string()))
    }

    fn check(response: &HttpResponse) -> Result<()> {
        if response.is_ok() {
            Ok(())
        } else {
            Err(AtvError::Command {
                error_code: i32::from(response.code),
                handler_status: 0,
            })
        }
    }
}

/// Map `caps` to a device state.
fn device_state(value: Option<u64>) -> DeviceState {
    match value {
        Some(1) => DeviceState::Loading,
        Some(2) => DeviceState::Stopped,
        Some(3) => DeviceState::Paused,
        Some(4) => DeviceState::Playing,
        Some(5) => DeviceState::FastForward,
        Some(6) => DeviceState::Rewind,
        _ => DeviceState::Idle,
    }
}

/// Map `cmmk` to a media type.
fn media_type(value: Option<u64>) -> MediaType {
    match value {
        Some(3) => MediaType::Music,
        Some(7 | 8 | 32) => MediaType::Video,
        Some(64) => MediaType::Tv,
        _ => MediaType::Unknown,
    }
}

/// Parse a `playstatusupdate` payload into a snapshot and revision.
#[must_use]
pub fn parse_play_status(items: &[DmapItem]) -> (PlayingState, u32) {
    #[allow(clippy::cast_possible_truncation)]
    let revision = items.uint_at(&[b"cmst", b"cmsr"]).unwrap_or(0) as u32;

    let total_ms = items.uint_at(&[b"cmst", b"cast"]);
    let remaining_ms = items.uint_at(&[b"cmst", b"cant"]);
    let total_time = total_ms.map(|ms| u32::try_from(ms / 1000).unwrap_or(u32::MAX));
    let position = match (total_ms, remaining_ms) {
        (Some(total), Some(remaining)) => {
            Some(u32::try_from(total.saturating_sub(remaining) / 1000).unwrap_or(u32::MAX))
        }
        _ => None,
    };

    let playing = PlayingState {
        media_type: media_type(items.uint_at(&[b"cmst", b"cmmk"])),
        device_state: device_state(items.uint_at(&[b"cmst", b"caps"])),
        title: items.str_at(&[b"cmst", b"cann"]).map(str::to_string),
        artist: items.str_at(&[b"cmst", b"cana"]).map(str::to_string),
        album: items.str_at(&[b"cmst", b"canl"]).map(str::to_string),
        genre: items.str_at(&[b"cmst", b"cang"]).map(str::to_string),
        total_time,
        position,
        repeat: match items.uint_at(&[b"cmst", b"carp"]) {
            Some(1) => RepeatState::Track,
            Some(2) => RepeatState::All,
            _ => RepeatState::Off,
        },
        shuffle: match items.uint_at(&[b"cmst", b"cash"]) {
            Some(0) | None => ShuffleState::Off,
            _ => ShuffleState::Songs,
        },
        ..PlayingState::default()
    };

    (playing, revision)
}
