//! SigV4 signing of the WebSocket connect request.
//!
//! [`RequestSigner::sign`] produces the three handshake headers
//! (`Authorization`, `X-Amz-Date`, `X-Amz-Security-Token`). Transports that
//! cannot set handshake headers can carry the same values in the URL, either
//! by rewriting the headers with [`SignedHeader::to_signed_url`] or by
//! signing the query string itself with [`RequestSigner::presign`].

use crate::config::Config;
use crate::token::TemporaryCredentials;
use crate::{Result, SockqlError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Signature algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Headers covered by a header-mode signature.
pub const SIGNED_HEADERS: &str = "host;x-amz-date;x-amz-security-token";

/// Default lifetime of a presigned URL.
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(300);

/// SigV4 caps presigned URLs at seven days.
const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const DATE_STAMP_FORMAT: &str = "%Y%m%d";

/// SHA-256 of the empty body; the connect request has none.
const EMPTY_PAYLOAD_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Unreserved characters per SigV4: everything else is percent-encoded.
const SIGV4_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

/// Signs connect requests for one region/service pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSigner {
    region: String,
    service: String,
}

impl RequestSigner {
    pub fn new(region: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.region.clone(), config.service.clone())
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Signs `method target` at `timestamp` for header delivery.
    ///
    /// The signature covers the host, the date and the security token. The
    /// result must be used promptly; the service rejects stale dates.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::Signing`] if the target has no host or the
    /// method is empty.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::Utc;
    /// use sockql::signer::RequestSigner;
    /// use sockql::TemporaryCredentials;
    /// use url::Url;
    ///
    /// let signer = RequestSigner::new("eu-west-1", "execute-api");
    /// let creds = TemporaryCredentials::new("ASIAEXAMPLE", "secret", "token");
    /// let target = Url::parse("wss://abc.execute-api.eu-west-1.amazonaws.com/prod").unwrap();
    ///
    /// let signed = signer.sign(&creds, &target, "GET", Utc::now()).unwrap();
    /// assert_eq!(signed.algorithm(), Some("AWS4-HMAC-SHA256"));
    /// assert_eq!(signed.security_token, "token");
    /// ```
    pub fn sign(
        &self,
        creds: &TemporaryCredentials,
        target: &Url,
        method: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<SignedHeader> {
        if method.is_empty() {
            return Err(SockqlError::Signing("method cannot be empty".to_string()));
        }

        let host = host_header(target)?;
        let amz_date = timestamp.format(AMZ_DATE_FORMAT).to_string();
        let query = canonical_query(target.query_pairs());

        let canonical = canonical_request(
            &method.to_ascii_uppercase(),
            target,
            &query,
            &[
                ("host", host.as_str()),
                ("x-amz-date", amz_date.as_str()),
                ("x-amz-security-token", creds.session_token.as_str()),
            ],
        );

        let scope = self.scope(timestamp);
        let signature = self.signature(&creds.secret_access_key, timestamp, &scope, &canonical)?;

        Ok(SignedHeader {
            authorization: format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, creds.access_key_id, scope, SIGNED_HEADERS, signature
            ),
            amz_date,
            security_token: creds.session_token.clone(),
            url: target.clone(),
        })
    }

    /// Produces a URL whose query string carries its own signature
    /// (`X-Amz-SignedHeaders=host`), valid for `expires`.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::Signing`] if the target has no host.
    pub fn presign(
        &self,
        creds: &TemporaryCredentials,
        target: &Url,
        timestamp: DateTime<Utc>,
        expires: Duration,
    ) -> Result<SignedUrl> {
        let host = host_header(target)?;
        let amz_date = timestamp.format(AMZ_DATE_FORMAT).to_string();
        let scope = self.scope(timestamp);
        let expires = expires.as_secs().clamp(1, MAX_PRESIGN_EXPIRY_SECS).to_string();
        let credential = format!("{}/{}", creds.access_key_id, scope);

        let mut pairs: Vec<(String, String)> = target.query_pairs().into_owned().collect();
        pairs.extend([
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            ("X-Amz-Credential".to_string(), credential),
            ("X-Amz-Date".to_string(), amz_date),
            ("X-Amz-Expires".to_string(), expires),
            ("X-Amz-Security-Token".to_string(), creds.session_token.clone()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ]);
        let query = canonical_query(
            pairs
                .iter()
                .map(|(k, v)| (Cow::Borrowed(k.as_str()), Cow::Borrowed(v.as_str()))),
        );

        let canonical = canonical_request("GET", target, &query, &[("host", host.as_str())]);
        let signature = self.signature(&creds.secret_access_key, timestamp, &scope, &canonical)?;

        let mut url = target.clone();
        url.set_query(Some(&format!("{}&X-Amz-Signature={}", query, signature)));
        Ok(SignedUrl { url })
    }

    fn scope(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            timestamp.format(DATE_STAMP_FORMAT),
            self.region,
            self.service
        )
    }

    fn signature(
        &self,
        secret: &str,
        timestamp: DateTime<Utc>,
        scope: &str,
        canonical_request: &str,
    ) -> Result<String> {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            timestamp.format(AMZ_DATE_FORMAT),
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let date_stamp = timestamp.format(DATE_STAMP_FORMAT).to_string();
        let key = signing_key(secret, &date_stamp, &self.region, &self.service)?;
        Ok(hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?))
    }
}

/// Handshake headers for a signed connect request.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedHeader {
    /// `AWS4-HMAC-SHA256 Credential=..., SignedHeaders=..., Signature=...`
    pub authorization: String,
    /// `X-Amz-Date` value (`YYYYMMDDTHHMMSSZ`)
    pub amz_date: String,
    /// `X-Amz-Security-Token` value
    pub security_token: String,
    /// The URL that was signed
    pub url: Url,
}

impl SignedHeader {
    /// Header name/value pairs to set on the handshake request.
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("authorization", self.authorization.as_str()),
            ("x-amz-date", self.amz_date.as_str()),
            ("x-amz-security-token", self.security_token.as_str()),
        ]
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.authorization.split_whitespace().next()
    }

    /// `<access key>/<scope>` from the authorization value.
    pub fn credential(&self) -> Option<&str> {
        auth_field(&self.authorization, "Credential=")
    }

    pub fn signed_headers(&self) -> Option<&str> {
        auth_field(&self.authorization, "SignedHeaders=")
    }

    pub fn signature(&self) -> Option<&str> {
        auth_field(&self.authorization, "Signature=")
    }

    /// Rewrites the headers into the query-string form:
    /// `X-Amz-Algorithm&X-Amz-Credential&X-Amz-Date&X-Amz-Security-Token&X-Amz-SignedHeaders=host&X-Amz-Signature`.
    ///
    /// Every value is percent-encoded so reserved characters in the token
    /// or credential survive.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::Signing`] if the authorization value lacks a
    /// credential or signature.
    pub fn to_query_string(&self) -> Result<String> {
        let missing = |what: &str| SockqlError::Signing(format!("authorization has no {}", what));
        let credential = self.credential().ok_or_else(|| missing("credential"))?;
        let signature = self.signature().ok_or_else(|| missing("signature"))?;
        let algorithm = self.algorithm().unwrap_or(ALGORITHM);

        Ok(format!(
            "X-Amz-Algorithm={}&X-Amz-Credential={}&X-Amz-Date={}&X-Amz-Security-Token={}&X-Amz-SignedHeaders=host&X-Amz-Signature={}",
            encode(algorithm),
            encode(credential),
            encode(&self.amz_date),
            encode(&self.security_token),
            encode(signature)
        ))
    }

    /// The signed URL with [`to_query_string`](Self::to_query_string)
    /// appended to any query it already had.
    pub fn to_signed_url(&self) -> Result<SignedUrl> {
        let signing = self.to_query_string()?;
        let mut url = self.url.clone();
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, signing),
            _ => signing,
        };
        url.set_query(Some(&query));
        Ok(SignedUrl { url })
    }

    /// Parses a URL in query-string form back into the header set.
    ///
    /// The signed-header list is always reported as [`SIGNED_HEADERS`]; the
    /// query form carries `host` for the same signature.
    ///
    /// # Errors
    ///
    /// Returns [`SockqlError::Signing`] if the URL does not parse or lacks a
    /// credential, date, security token or signature.
    pub fn from_signed_url(signed: &str) -> Result<Self> {
        let mut url = Url::parse(signed)
            .map_err(|e| SockqlError::Signing(format!("signed url does not parse: {}", e)))?;

        let mut algorithm = None;
        let mut credential = None;
        let mut amz_date = None;
        let mut security_token = None;
        let mut signature = None;
        let mut rest = Vec::new();

        for (key, value) in url.query_pairs() {
            let value = value.into_owned();
            match key.as_ref() {
                "X-Amz-Algorithm" => algorithm = Some(value),
                "X-Amz-Credential" => credential = Some(value),
                "X-Amz-Date" => amz_date = Some(value),
                "X-Amz-Security-Token" => security_token = Some(value),
                "X-Amz-Signature" => signature = Some(value),
                "X-Amz-SignedHeaders" | "X-Amz-Expires" => {}
                _ => rest.push((key.into_owned(), value)),
            }
        }

        let missing = |what: &str| SockqlError::Signing(format!("signed url has no {}", what));
        let credential = credential.ok_or_else(|| missing("X-Amz-Credential"))?;
        let amz_date = amz_date.ok_or_else(|| missing("X-Amz-Date"))?;
        let security_token = security_token.ok_or_else(|| missing("X-Amz-Security-Token"))?;
        let signature = signature.ok_or_else(|| missing("X-Amz-Signature"))?;

        if rest.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(rest);
        }

        Ok(Self {
            authorization: format!(
                "{} Credential={}, SignedHeaders={}, Signature={}",
                algorithm.as_deref().unwrap_or(ALGORITHM),
                credential,
                SIGNED_HEADERS,
                signature
            ),
            amz_date,
            security_token,
            url,
        })
    }
}

impl fmt::Debug for SignedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedHeader")
            .field("credential", &self.credential())
            .field("amz_date", &self.amz_date)
            .field("security_token", &"<redacted>")
            .field("url", &self.url.as_str())
            .finish()
    }
}

/// A connect URL carrying its signature in the query string.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedUrl {
    url: Url,
}

impl SignedUrl {
    pub fn as_url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn into_url(self) -> Url {
        self.url
    }

    /// The URL without its query string, safe to log.
    pub fn base(&self) -> String {
        let mut base = self.url.clone();
        base.set_query(None);
        base.to_string()
    }
}

impl fmt::Debug for SignedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedUrl")
            .field("base", &self.base())
            .field("query", &"<redacted>")
            .finish()
    }
}

/// Derives the SigV4 signing key for one day, region and service.
pub fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Result<[u8; 32]> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| SockqlError::Signing("HMAC key initialization failed".to_string()))?;
    mac.update(data);
    let bytes = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, SIGV4_ENCODE).to_string()
}

/// `host[:port]`; default ports are omitted.
fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| SockqlError::Signing(format!("url has no host: {}", url.as_str())))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Path segments encoded a second time, as SigV4 requires for every service
/// but S3.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    path.split('/').map(encode).collect::<Vec<_>>().join("/")
}

fn canonical_query<'a, I>(pairs: I) -> String
where
    I: Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>,
{
    let mut encoded: Vec<(String, String)> = pairs.map(|(k, v)| (encode(&k), encode(&v))).collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Headers must be lowercase and already in sorted order.
fn canonical_request(method: &str, url: &Url, query: &str, headers: &[(&str, &str)]) -> String {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed: Vec<&str> = headers.iter().map(|(name, _)| *name).collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_uri(url),
        query,
        canonical_headers,
        signed.join(";"),
        EMPTY_PAYLOAD_SHA256
    )
}

fn auth_field<'a>(authorization: &'a str, key: &str) -> Option<&'a str> {
    let start = authorization.find(key)? + key.len();
    let rest = &authorization[start..];
    let end = rest.find(',').unwrap_or(rest.len());
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn creds() -> TemporaryCredentials {
        TemporaryCredentials::new(
            "ASIAEXAMPLE",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "IQoJb3JpZ2luX2Vj/session+token==",
        )
    }

    fn target() -> Url {
        Url::parse("wss://abc123.execute-api.eu-west-1.amazonaws.com/prod").unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_signing_key_vector() {
        let key = signing_key("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY", "20150830", "us-east-1", "iam")
            .unwrap();
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_get_vanilla_vector() {
        let signer = RequestSigner::new("us-east-1", "service");
        let url = Url::parse("https://example.amazonaws.com/").unwrap();
        let ts = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();

        let canonical = canonical_request(
            "GET",
            &url,
            "",
            &[("host", "example.amazonaws.com"), ("x-amz-date", "20150830T123600Z")],
        );
        let signature = signer
            .signature(
                "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
                ts,
                &signer.scope(ts),
                &canonical,
            )
            .unwrap();

        assert_eq!(
            signature,
            "5fa00fa31553b73ebf1942676e86291e8372ff2a2260956d9b8aae1d763fbf31"
        );
    }

    #[test]
    fn test_sign_authorization_shape() {
        let signer = RequestSigner::new("eu-west-1", "execute-api");
        let signed = signer.sign(&creds(), &target(), "GET", at()).unwrap();

        assert_eq!(signed.amz_date, "20240102T030405Z");
        assert_eq!(signed.algorithm(), Some(ALGORITHM));
        assert_eq!(
            signed.credential(),
            Some("ASIAEXAMPLE/20240102/eu-west-1/execute-api/aws4_request")
        );
        assert_eq!(signed.signed_headers(), Some(SIGNED_HEADERS));

        let signature = signed.signature().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = RequestSigner::new("eu-west-1", "execute-api");
        let a = signer.sign(&creds(), &target(), "GET", at()).unwrap();
        let b = signer.sign(&creds(), &target(), "get", at()).unwrap();
        assert_eq!(a, b);

        let later = signer
            .sign(&creds(), &target(), "GET", at() + chrono::Duration::seconds(1))
            .unwrap();
        assert_ne!(a.signature(), later.signature());
    }

    #[test]
    fn test_query_string_round_trip() {
        let signer = RequestSigner::new("eu-west-1", "execute-api");
        let signed = signer.sign(&creds(), &target(), "GET", at()).unwrap();

        let url = signed.to_signed_url().unwrap();
        assert!(url.as_str().starts_with("wss://abc123.execute-api.eu-west-1.amazonaws.com/prod?X-Amz-Algorithm="));
        // reserved characters of the token never appear raw
        let query = url.as_url().query().unwrap();
        assert!(!query.contains('+'));
        assert!(query.contains("X-Amz-SignedHeaders=host&"));

        let params: HashMap<String, String> = url.as_url().query_pairs().into_owned().collect();
        assert_eq!(params["X-Amz-Algorithm"], ALGORITHM);
        assert_eq!(params["X-Amz-Credential"], signed.credential().unwrap());
        assert_eq!(params["X-Amz-Date"], signed.amz_date);
        assert_eq!(params["X-Amz-Security-Token"], signed.security_token);
        assert_eq!(params["X-Amz-Signature"], signed.signature().unwrap());

        let parsed = SignedHeader::from_signed_url(url.as_str()).unwrap();
        assert_eq!(parsed, signed);
    }

    #[test]
    fn test_from_signed_url_requires_signature() {
        let err = SignedHeader::from_signed_url(
            "wss://h/prod?X-Amz-Credential=a&X-Amz-Date=b&X-Amz-Security-Token=c",
        )
        .unwrap_err();
        assert!(err.to_string().contains("X-Amz-Signature"));
    }

    #[test]
    fn test_host_header_keeps_explicit_port() {
        let url = Url::parse("ws://127.0.0.1:9000/").unwrap();
        assert_eq!(host_header(&url).unwrap(), "127.0.0.1:9000");
        assert_eq!(host_header(&target()).unwrap(), "abc123.execute-api.eu-west-1.amazonaws.com");
    }

    #[test]
    fn test_canonical_uri_double_encodes() {
        let url = Url::parse("wss://h/stage/a%20b").unwrap();
        assert_eq!(canonical_uri(&url), "/stage/a%2520b");
    }

    #[test]
    fn test_presign_shape() {
        let signer = RequestSigner::new("eu-west-1", "execute-api");
        let url = signer
            .presign(&creds(), &target(), at(), DEFAULT_PRESIGN_EXPIRY)
            .unwrap();

        let params: Vec<(String, String)> = url.as_url().query_pairs().into_owned().collect();
        let keys: Vec<&str> = params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "X-Amz-Algorithm",
                "X-Amz-Credential",
                "X-Amz-Date",
                "X-Amz-Expires",
                "X-Amz-Security-Token",
                "X-Amz-SignedHeaders",
                "X-Amz-Signature",
            ]
        );
        assert_eq!(params[3].1, "300");
        assert_eq!(params[4].1, creds().session_token);
        assert_eq!(params[5].1, "host");
        assert!(!format!("{:?}", url).contains("session"));
    }
}
