//! Client-data JSON parsing.

use base64::Engine;
use serde::Deserialize;

/// Client-data type declared by an authentication assertion.
pub const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";

/// Fields of the client-data JSON this verifier inspects.
///
/// The challenge arrives base64url-encoded inside the JSON.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub client_data_type: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default, rename = "crossOrigin")]
    pub cross_origin: Option<bool>,
}

impl ClientData {
    /// Parse client-data JSON bytes. Returns `None` when malformed.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// Decode the embedded challenge to raw bytes.
    #[must_use]
    pub fn challenge_bytes(&self) -> Option<Vec<u8>> {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(self.challenge.as_bytes())
            .ok()
    }

    #[must_use]
    pub fn is_assertion(&self) -> bool {
        self.client_data_type == CLIENT_DATA_TYPE_GET
    }

    #[must_use]
    pub fn declares_cross_origin(&self) -> bool {
        self.cross_origin == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::ClientData;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn payload(ty: &str, cross_origin: Option<bool>) -> Vec<u8> {
        let challenge = URL_SAFE_NO_PAD.encode(b"issued-challenge");
        let mut value = serde_json::json!({
            "type": ty,
            "challenge": challenge,
            "origin": "http://localhost:4321",
        });
        if let Some(cross) = cross_origin {
            value["crossOrigin"] = serde_json::json!(cross);
        }
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn parses_assertion_client_data() {
        let data = ClientData::parse(&payload("webauthn.get", None)).unwrap();
        assert!(data.is_assertion());
        assert_eq!(data.origin, "http://localhost:4321");
        assert_eq!(data.challenge_bytes().unwrap(), b"issued-challenge");
        assert!(!data.declares_cross_origin());
    }

    #[test]
    fn creation_type_is_not_an_assertion() {
        let data = ClientData::parse(&payload("webauthn.create", None)).unwrap();
        assert!(!data.is_assertion());
    }

    #[test]
    fn cross_origin_flag_is_detected() {
        let data = ClientData::parse(&payload("webauthn.get", Some(true))).unwrap();
        assert!(data.declares_cross_origin());
        let data = ClientData::parse(&payload("webauthn.get", Some(false))).unwrap();
        assert!(!data.declares_cross_origin());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(ClientData::parse(b"{not json").is_none());
        assert!(ClientData::parse(b"{}").is_none());
    }

    #[test]
    fn invalid_challenge_encoding_yields_none() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "type": "webauthn.get",
            "challenge": "!!!not-base64url!!!",
            "origin": "http://localhost:4321",
        }))
        .unwrap();
        let data = ClientData::parse(&raw).unwrap();
        assert!(data.challenge_bytes().is_none());
    }
}
