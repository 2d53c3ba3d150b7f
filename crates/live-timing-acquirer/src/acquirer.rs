//! Auth/key/keyframe/total-laps acquisition state machine.
//!
//! Each kind of request sets its bit in `obtaining` while in flight and,
//! once a result lands, its bit in `pending` until the caller consumes
//! it. `AUTH` and `KEY` additionally block packet hand-off from the
//! input cache to the encrypted cache while outstanding — callers check
//! [`Acquirer::is_blocking`] for that.

use live_timing_errors::AcquirerError;

use crate::transport::Transport;

pub const OBTAINING_AUTH: u32 = 1;
pub const OBTAINING_CONNECT: u32 = 2;
pub const OBTAINING_FRAME: u32 = 4;
pub const OBTAINING_KEY: u32 = 8;
pub const OBTAINING_TOTALLAPS: u32 = 16;
pub const OBTAINING_ALL: u32 = 31;

/// Requests that must complete before packets can flow from the input
/// cache to the encrypted cache.
const BLOCKING_MASK: u32 = OBTAINING_AUTH | OBTAINING_KEY;

const LOGIN_PATH: &str = "/reg/login";
const KEY_PATH_BASE: &str = "/reg/getkey/";
const KEYFRAME_PATH_PREFIX: &str = "/keyframe";
const TOTAL_LAPS_PATH: &str = "/laps.php";

fn url_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Scan a `Set-Cookie` header value for the `USER=...` cookie, stopping
/// at the first `;`. Mirrors `http.c`'s `parse_cookie_hdr`.
fn parse_user_cookie(header: &str) -> Option<String> {
    let rest = header.strip_prefix("USER=")?;
    let end = rest.find(';').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

/// Accumulate hexadecimal digits from the front of `body` into a `u32`,
/// stopping at the first non-hex byte. Mirrors `http.c`'s `parse_key_body`.
fn parse_hex_key(body: &[u8]) -> u32 {
    let mut key: u32 = 0;
    for &b in body {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => break,
        };
        key = (key << 4) | u32::from(digit);
    }
    key
}

/// Accumulate decimal digits from the front of `body`. Mirrors
/// `http.c`'s `parse_number_body`.
fn parse_decimal_number(body: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &b in body {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add(u32::from(b - b'0'));
    }
    value
}

/// HTTP-driven acquisition state machine.
pub struct Acquirer<T: Transport> {
    transport: T,
    auth_host: String,
    key_host: String,
    obtaining: u32,
    pending: u32,
    cookie: Option<String>,
}

impl<T: Transport> Acquirer<T> {
    pub fn new(transport: T, auth_host: impl Into<String>, key_host: impl Into<String>) -> Self {
        Self {
            transport,
            auth_host: auth_host.into(),
            key_host: key_host.into(),
            obtaining: 0,
            pending: 0,
            cookie: None,
        }
    }

    pub fn obtaining(&self) -> u32 {
        self.obtaining
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn is_obtaining(&self, flag: u32) -> bool {
        self.obtaining & flag != 0
    }

    pub fn is_pending(&self, flag: u32) -> bool {
        self.pending & flag != 0
    }

    /// True while packet hand-off from the input cache should be
    /// suspended (an `AUTH` or `KEY` request is in flight).
    pub fn is_blocking(&self) -> bool {
        self.obtaining & BLOCKING_MASK != 0
    }

    /// Clear the pending bit for `flag` once the caller has consumed
    /// that request's result.
    pub fn acknowledge(&mut self, flag: u32) {
        self.pending &= !flag;
    }

    fn begin(&mut self, flag: &'static str, mask: u32) -> Result<(), AcquirerError> {
        if self.obtaining & Self::flag_value(flag) != 0 {
            return Err(AcquirerError::AlreadyObtaining(flag));
        }
        self.obtaining |= mask;
        Ok(())
    }

    fn flag_value(flag: &'static str) -> u32 {
        match flag {
            "auth" => OBTAINING_AUTH,
            "frame" => OBTAINING_FRAME,
            "key" => OBTAINING_KEY,
            "total_laps" => OBTAINING_TOTALLAPS,
            _ => 0,
        }
    }

    fn finish(&mut self, mask: u32) {
        self.obtaining &= !mask;
        self.pending |= mask;
    }

    /// Obtain the user's authentication cookie by logging in. Stores it
    /// for subsequent key requests.
    pub async fn request_auth(&mut self, email: &str, password: &str) -> Result<(), AcquirerError> {
        self.begin("auth", OBTAINING_AUTH)?;
        let body = format!("email={}&password={}", url_escape(email), url_escape(password));
        let result = self.transport.post_form(&self.auth_host, LOGIN_PATH, &body).await;
        self.finish(OBTAINING_AUTH);

        let resp = result?;
        if resp.status >= 400 {
            return Err(AcquirerError::AuthRejected);
        }
        let cookie = resp
            .header("Set-Cookie")
            .and_then(parse_user_cookie)
            .ok_or(AcquirerError::AuthRejected)?;
        tracing::info!("obtained authentication cookie");
        self.cookie = Some(cookie);
        Ok(())
    }

    /// Obtain the decryption key for `event_no` using the stored cookie.
    pub async fn request_key(&mut self, event_no: u32) -> Result<u32, AcquirerError> {
        self.begin("key", OBTAINING_KEY)?;

        let cookie = match self.cookie.clone() {
            Some(c) => c,
            None => {
                self.finish(OBTAINING_KEY);
                return Err(AcquirerError::KeyRequestFailed("no auth cookie".into()));
            }
        };
        let path = format!("{KEY_PATH_BASE}{event_no}.asp?auth={cookie}");
        let result = self.transport.get(&self.key_host, &path).await;
        self.finish(OBTAINING_KEY);

        let resp = result?;
        Ok(parse_hex_key(&resp.body))
    }

    /// Obtain a key frame; `frame = None` asks for the current one.
    pub async fn request_key_frame(&mut self, frame: Option<u32>) -> Result<Vec<u8>, AcquirerError> {
        self.begin("frame", OBTAINING_FRAME)?;
        let path = match frame {
            Some(n) => format!("{KEYFRAME_PATH_PREFIX}_{n:05}.bin"),
            None => format!("{KEYFRAME_PATH_PREFIX}.bin"),
        };
        let result = self.transport.get(&self.key_host, &path).await;
        self.finish(OBTAINING_FRAME);

        let resp = result.map_err(|e| AcquirerError::FrameRequestFailed(e.to_string()))?;
        if resp.status >= 400 {
            return Err(AcquirerError::FrameRequestFailed(format!("status {}", resp.status)));
        }
        Ok(resp.body)
    }

    /// Obtain the total number of laps for the event.
    pub async fn request_total_laps(&mut self) -> Result<u32, AcquirerError> {
        self.begin("total_laps", OBTAINING_TOTALLAPS)?;
        let result = self.transport.get(&self.key_host, TOTAL_LAPS_PATH).await;
        self.finish(OBTAINING_TOTALLAPS);

        let resp = result.map_err(|e| AcquirerError::TotalLapsRequestFailed(e.to_string()))?;
        Ok(parse_decimal_number(&resp.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        auth_response: Mutex<Option<HttpResponse>>,
        get_response: Mutex<Option<HttpResponse>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post_form(&self, _host: &str, _path: &str, _form: &str) -> Result<HttpResponse, AcquirerError> {
            Ok(self.auth_response.lock().expect("lock").clone().unwrap_or_default())
        }

        async fn get(&self, _host: &str, _path: &str) -> Result<HttpResponse, AcquirerError> {
            Ok(self.get_response.lock().expect("lock").clone().unwrap_or_default())
        }
    }

    #[test]
    fn hex_key_parses_until_non_hex() {
        assert_eq!(parse_hex_key(b"deadbeefXYZ"), 0xDEAD_BEEF);
        assert_eq!(parse_hex_key(b""), 0);
    }

    #[test]
    fn decimal_number_parses_until_non_digit() {
        assert_eq!(parse_decimal_number(b"58 laps"), 58);
        assert_eq!(parse_decimal_number(b"nope"), 0);
    }

    #[test]
    fn cookie_header_extracts_user_value() {
        assert_eq!(parse_user_cookie("USER=abc123; path=/"), Some("abc123".to_string()));
        assert_eq!(parse_user_cookie("SESSION=xyz"), None);
    }

    #[tokio::test]
    async fn auth_success_sets_cookie_and_clears_obtaining() {
        let transport = FakeTransport {
            auth_response: Mutex::new(Some(HttpResponse {
                status: 200,
                headers: vec![("Set-Cookie".into(), "USER=tok; path=/".into())],
                body: vec![],
            })),
            ..Default::default()
        };
        let mut acquirer = Acquirer::new(transport, "host", "host");
        acquirer.request_auth("a@b.com", "pw").await.expect("auth ok");
        assert!(!acquirer.is_obtaining(OBTAINING_AUTH));
        assert!(acquirer.is_pending(OBTAINING_AUTH));
        assert_eq!(acquirer.cookie.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn auth_rejected_without_cookie() {
        let transport = FakeTransport {
            auth_response: Mutex::new(Some(HttpResponse {
                status: 200,
                ..Default::default()
            })),
            ..Default::default()
        };
        let mut acquirer = Acquirer::new(transport, "host", "host");
        let err = acquirer.request_auth("a@b.com", "pw").await.unwrap_err();
        assert!(matches!(err, AcquirerError::AuthRejected));
    }

    #[tokio::test]
    async fn key_frame_defaults_to_current_frame_path() {
        let transport = FakeTransport {
            get_response: Mutex::new(Some(HttpResponse {
                status: 200,
                body: b"frame-bytes".to_vec(),
                ..Default::default()
            })),
            ..Default::default()
        };
        let mut acquirer = Acquirer::new(transport, "host", "host");
        let body = acquirer.request_key_frame(None).await.expect("frame ok");
        assert_eq!(body, b"frame-bytes");
    }
}
