//! SASL client-side exchanges (`spec.md` §4.3.1 step 3).
//!
//! The original's `core/sasl/*` implements PLAIN and the SCRAM family against
//! libsodium-backed primitives; here they're built on `sha2`/`hmac`/`pbkdf2`,
//! the closest real crates available to this pack for the same job.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha1, Sha256, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain,
    ScramSha512,
    ScramSha256,
    ScramSha1,
}

impl SaslMechanism {
    pub fn name(self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha512 => "SCRAM-SHA512",
            SaslMechanism::ScramSha256 => "SCRAM-SHA256",
            SaslMechanism::ScramSha1 => "SCRAM-SHA1",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PLAIN" => Some(SaslMechanism::Plain),
            "SCRAM-SHA512" => Some(SaslMechanism::ScramSha512),
            "SCRAM-SHA256" => Some(SaslMechanism::ScramSha256),
            "SCRAM-SHA1" => Some(SaslMechanism::ScramSha1),
            _ => None,
        }
    }

    /// Mechanism list the session offers when the user supplied none
    /// (`spec.md` §4.3.1 step 3): `[PLAIN]` on TLS, else the SCRAM family in
    /// descending strength.
    pub fn default_order(use_tls: bool) -> Vec<SaslMechanism> {
        if use_tls {
            vec![SaslMechanism::Plain]
        } else {
            vec![SaslMechanism::ScramSha512, SaslMechanism::ScramSha256, SaslMechanism::ScramSha1]
        }
    }
}

/// The PLAIN exchange is a single round: `\0username\0password`.
pub fn plain_initial_response(username: &str, password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(username.len() + password.len() + 2);
    out.push(0u8);
    out.extend_from_slice(username.as_bytes());
    out.push(0u8);
    out.extend_from_slice(password.as_bytes());
    out
}

#[derive(Debug)]
pub enum ScramError {
    MalformedServerMessage,
    ServerSignatureMismatch,
}

/// Driver for one client-first → server-first → client-final → server-final
/// SCRAM exchange (RFC 5802), parameterised over the negotiated hash.
pub struct ScramClient {
    mechanism: SaslMechanism,
    username: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(mechanism: SaslMechanism, username: &str, password: &str) -> Self {
        let mut nonce_bytes = [0u8; 18];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let client_nonce = BASE64.encode(nonce_bytes);
        let client_first_bare = format!("n={},r={}", scram_escape(username), client_nonce);
        ScramClient {
            mechanism,
            username: username.to_string(),
            password: password.to_string(),
            client_nonce,
            client_first_bare,
            server_signature: None,
        }
    }

    pub fn client_first_message(&self) -> Vec<u8> {
        format!("n,,{}", self.client_first_bare).into_bytes()
    }

    /// Consumes the server-first message, returns the client-final message.
    pub fn handle_server_first(&mut self, server_first: &[u8]) -> Result<Vec<u8>, ScramError> {
        let text = std::str::from_utf8(server_first).map_err(|_| ScramError::MalformedServerMessage)?;
        let fields = parse_scram_fields(text);
        let server_nonce = fields.get("r").ok_or(ScramError::MalformedServerMessage)?;
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(ScramError::MalformedServerMessage);
        }
        let salt_b64 = fields.get("s").ok_or(ScramError::MalformedServerMessage)?;
        let salt = BASE64.decode(salt_b64.as_bytes()).map_err(|_| ScramError::MalformedServerMessage)?;
        let iterations: u32 = fields.get("i").and_then(|s| s.parse().ok()).ok_or(ScramError::MalformedServerMessage)?;

        let channel_binding = BASE64.encode("n,,");
        let client_final_no_proof = format!("c={},r={}", channel_binding, server_nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, text, client_final_no_proof);

        let (client_proof, server_signature) = match self.mechanism {
            SaslMechanism::ScramSha512 => self.compute_proof::<Sha512>(&salt, iterations, &auth_message),
            SaslMechanism::ScramSha256 => self.compute_proof::<Sha256>(&salt, iterations, &auth_message),
            SaslMechanism::ScramSha1 => self.compute_proof::<Sha1>(&salt, iterations, &auth_message),
            SaslMechanism::Plain => unreachable!("ScramClient constructed with PLAIN mechanism"),
        };
        self.server_signature = Some(server_signature);

        Ok(format!("{},p={}", client_final_no_proof, BASE64.encode(client_proof)).into_bytes())
    }

    /// Verifies the server's final message carries the expected signature.
    pub fn verify_server_final(&self, server_final: &[u8]) -> Result<(), ScramError> {
        let text = std::str::from_utf8(server_final).map_err(|_| ScramError::MalformedServerMessage)?;
        let fields = parse_scram_fields(text);
        let v = fields.get("v").ok_or(ScramError::MalformedServerMessage)?;
        let got = BASE64.decode(v.as_bytes()).map_err(|_| ScramError::MalformedServerMessage)?;
        if self.server_signature.as_deref() != Some(got.as_slice()) {
            return Err(ScramError::ServerSignatureMismatch);
        }
        Ok(())
    }

    fn compute_proof<D>(&self, salt: &[u8], iterations: u32, auth_message: &str) -> (Vec<u8>, Vec<u8>)
    where
        D: Digest + Clone,
        Hmac<D>: Mac,
    {
        let mut salted_password = vec![0u8; D::output_size()];
        pbkdf2_hmac::<D>(self.password.as_bytes(), salt, iterations, &mut salted_password);

        let client_key = hmac_sign::<D>(&salted_password, b"Client Key");
        let stored_key = {
            let mut hasher = D::new();
            Digest::update(&mut hasher, &client_key);
            hasher.finalize().to_vec()
        };
        let client_signature = hmac_sign::<D>(&stored_key, auth_message.as_bytes());
        let client_proof: Vec<u8> = client_key.iter().zip(client_signature.iter()).map(|(a, b)| a ^ b).collect();

        let server_key = hmac_sign::<D>(&salted_password, b"Server Key");
        let server_signature = hmac_sign::<D>(&server_key, auth_message.as_bytes());

        let _ = &self.username;
        (client_proof, server_signature)
    }
}

fn hmac_sign<D>(key: &[u8], message: &[u8]) -> Vec<u8>
where
    D: Digest + Clone,
    Hmac<D>: Mac,
{
    let mut mac = <Hmac<D> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn scram_escape(s: &str) -> String {
    s.replace('=', "=3D").replace(',', "=2C")
}

fn parse_scram_fields(text: &str) -> std::collections::HashMap<&str, &str> {
    text.split(',')
        .filter_map(|kv| kv.split_once('='))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_prefers_plain_on_tls() {
        assert_eq!(SaslMechanism::default_order(true), vec![SaslMechanism::Plain]);
        assert_eq!(
            SaslMechanism::default_order(false),
            vec![SaslMechanism::ScramSha512, SaslMechanism::ScramSha256, SaslMechanism::ScramSha1]
        );
    }

    #[test]
    fn plain_response_is_null_separated() {
        let resp = plain_initial_response("alice", "hunter2");
        assert_eq!(resp, b"\0alice\0hunter2");
    }

    #[test]
    fn scram_escape_handles_reserved_chars() {
        assert_eq!(scram_escape("a,b=c"), "a=2Cb=3Dc");
    }

    #[test]
    fn client_first_message_carries_username_and_nonce() {
        let client = ScramClient::new(SaslMechanism::ScramSha256, "alice", "hunter2");
        let msg = String::from_utf8(client.client_first_message()).unwrap();
        assert!(msg.starts_with("n,,n=alice,r="));
    }
}
