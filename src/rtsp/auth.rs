//! HTTP Digest authentication for RTSP (RFC 2617, referenced by RFC 2326 §18.3).
//!
//! Only the simple `qop`-less variant is implemented: `response =
//! MD5(HA1:nonce:HA2)`. It is what the overwhelming majority of RTSP
//! clients (ffmpeg, VLC, IP cameras) speak, and matches §8's
//! authentication model.

use md5::{Digest, Md5};
use rand::Rng;

use crate::config::DigestCredentials;

fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A server-issued nonce challenge, valid until the connection rotates it.
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
}

impl DigestChallenge {
    /// Generate a fresh challenge. The nonce is an opaque random token;
    /// RFC 2617 places no structural requirement on it beyond
    /// uniqueness and unpredictability.
    pub fn new(realm: &str) -> Self {
        let nonce: u128 = rand::rng().random();
        Self {
            realm: realm.to_string(),
            nonce: format!("{:032x}", nonce),
        }
    }

    pub fn www_authenticate_header(&self) -> String {
        format!(
            "Digest realm=\"{}\", nonce=\"{}\"",
            self.realm, self.nonce
        )
    }
}

/// One field extracted from an `Authorization: Digest ...` request header.
fn extract_field<'a>(header: &'a str, field: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", field);
    let start = header.find(&needle)? + needle.len();
    let end = start + header[start..].find('"')?;
    Some(&header[start..end])
}

/// Verify an `Authorization` header value against the credentials this
/// server was configured with and the challenge it most recently issued
/// on this connection.
///
/// `method` and `uri` must match the request line the Authorization
/// header rode in on (HA2 binds the digest to that specific request).
pub fn verify(
    authorization: &str,
    credentials: &DigestCredentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
) -> bool {
    let Some(username) = extract_field(authorization, "username") else {
        return false;
    };
    let Some(nonce) = extract_field(authorization, "nonce") else {
        return false;
    };
    let Some(response) = extract_field(authorization, "response") else {
        return false;
    };

    if username != credentials.username || nonce != challenge.nonce {
        return false;
    }

    let ha1 = md5_hex(&[&credentials.username, &credentials.realm, &credentials.password]);
    let ha2 = md5_hex(&[method, uri]);
    let expected = md5_hex(&[&ha1, nonce, &ha2]);

    expected == response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> DigestCredentials {
        DigestCredentials {
            realm: "streaming".to_string(),
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        }
    }

    fn client_response(
        creds: &DigestCredentials,
        nonce: &str,
        method: &str,
        uri: &str,
    ) -> String {
        let ha1 = md5_hex(&[&creds.username, &creds.realm, &creds.password]);
        let ha2 = md5_hex(&[method, uri]);
        md5_hex(&[&ha1, nonce, &ha2])
    }

    #[test]
    fn accepts_correctly_computed_response() {
        let creds = creds();
        let challenge = DigestChallenge {
            realm: creds.realm.clone(),
            nonce: "abc123".to_string(),
        };
        let response = client_response(&creds, &challenge.nonce, "DESCRIBE", "rtsp://host/live");
        let header = format!(
            "Digest username=\"alice\", realm=\"streaming\", nonce=\"abc123\", uri=\"rtsp://host/live\", response=\"{}\"",
            response
        );
        assert!(verify(
            &header,
            &creds,
            &challenge,
            "DESCRIBE",
            "rtsp://host/live"
        ));
    }

    #[test]
    fn rejects_wrong_password() {
        let creds = creds();
        let wrong = DigestCredentials {
            password: "wrong".to_string(),
            ..creds.clone()
        };
        let challenge = DigestChallenge {
            realm: creds.realm.clone(),
            nonce: "abc123".to_string(),
        };
        let response = client_response(&wrong, &challenge.nonce, "DESCRIBE", "rtsp://host/live");
        let header = format!(
            "Digest username=\"alice\", realm=\"streaming\", nonce=\"abc123\", response=\"{}\"",
            response
        );
        assert!(!verify(
            &header,
            &creds,
            &challenge,
            "DESCRIBE",
            "rtsp://host/live"
        ));
    }

    #[test]
    fn rejects_stale_nonce() {
        let creds = creds();
        let old_nonce = "abc123";
        let response = client_response(&creds, old_nonce, "DESCRIBE", "rtsp://host/live");
        let header = format!(
            "Digest username=\"alice\", realm=\"streaming\", nonce=\"{}\", response=\"{}\"",
            old_nonce, response
        );
        let current_challenge = DigestChallenge {
            realm: creds.realm.clone(),
            nonce: "def456".to_string(),
        };
        assert!(!verify(
            &header,
            &creds,
            &current_challenge,
            "DESCRIBE",
            "rtsp://host/live"
        ));
    }

    #[test]
    fn www_authenticate_header_carries_realm_and_nonce() {
        let challenge = DigestChallenge::new("streaming");
        let header = challenge.www_authenticate_header();
        assert!(header.starts_with("Digest realm=\"streaming\""));
        assert!(header.contains(&challenge.nonce));
    }
}
