//! Bootstrap state machine (`spec.md` §4.3.1): HELLO → SASL_LIST_MECHS →
//! SASL_AUTH/STEP → GET_ERROR_MAP → SELECT_BUCKET → GET_CLUSTER_CONFIG,
//! pipelined as ordered opaque requests.

use kv_protocol::{
    ClusterConfig, ClientError, DataType, ErrorKind, ErrorMap, FeatureSet, Magic, OpCode, Packet, Status,
};

use crate::options::ClusterOptions;
use crate::sasl::{plain_initial_response, SaslMechanism, ScramClient};
use crate::session::io::{read_one_frame, write_frame, FrameIoError};

pub struct BootstrapOutcome {
    pub negotiated_features: FeatureSet,
    pub error_map: Option<ErrorMap>,
    pub config: ClusterConfig,
}

impl From<FrameIoError> for ClientError {
    fn from(e: FrameIoError) -> Self {
        let kind = match e {
            FrameIoError::Eof | FrameIoError::Io(_) => ErrorKind::HandshakeFailure,
            FrameIoError::Malformed => ErrorKind::ProtocolError,
        };
        ClientError::new(kind, e.to_string())
    }
}

fn request(opcode: OpCode, opaque: u32, extras: Vec<u8>, key: Vec<u8>, value: Vec<u8>) -> Packet {
    Packet {
        magic: Magic::Request,
        opcode,
        datatype: DataType::RAW,
        vbucket_or_status: 0,
        opaque,
        cas: 0,
        framing_extras: Vec::new(),
        extras,
        collection_uid: None,
        key,
        value,
    }
}

struct OpaqueCounter(u32);

impl OpaqueCounter {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }
}

/// Runs the full bootstrap sequence over `stream`, the session's TCP/TLS
/// connection. `endpoint` is used only to annotate errors.
pub async fn bootstrap<S>(stream: &mut S, opts: &ClusterOptions, endpoint: &str) -> Result<BootstrapOutcome, ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut opaque = OpaqueCounter(0);

    let negotiated_features = hello(stream, &mut buf, &mut opaque, opts, endpoint).await?;

    // Client-certificate authentication is out of scope (`spec.md` §2
    // Non-goals); SASL always runs.
    sasl_list_mechs(stream, &mut buf, &mut opaque, endpoint).await?;
    sasl_authenticate(stream, &mut buf, &mut opaque, opts, endpoint).await?;

    let error_map = if negotiated_features.contains(kv_protocol::HelloFeature::Xerror) {
        Some(get_error_map(stream, &mut buf, &mut opaque, endpoint).await?)
    } else {
        None
    };

    if let Some(bucket) = &opts.bucket {
        select_bucket(stream, &mut buf, &mut opaque, bucket, endpoint).await?;
    }

    let config = get_cluster_config(stream, &mut buf, &mut opaque, opts.bucket.is_some(), endpoint).await?;

    Ok(BootstrapOutcome { negotiated_features, error_map, config })
}

async fn roundtrip<S>(stream: &mut S, buf: &mut Vec<u8>, packet: &Packet) -> Result<Packet, ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    write_frame(stream, packet).await.map_err(|e| ClientError::new(ErrorKind::HandshakeFailure, e.to_string()))?;
    Ok(read_one_frame(stream, buf).await?)
}

async fn hello<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    opaque: &mut OpaqueCounter,
    opts: &ClusterOptions,
    endpoint: &str,
) -> Result<FeatureSet, ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let agent = &opts.user_agent;
    debug_assert!(agent.len() <= 250, "user agent must be <= 250 chars (validated at options build time)");

    let mut value = Vec::new();
    for code in opts.requested_features.to_codes() {
        value.extend_from_slice(&code.to_be_bytes());
    }

    let req = request(OpCode::Hello, opaque.next(), Vec::new(), agent.as_bytes().to_vec(), value);
    let resp = roundtrip(stream, buf, &req).await?;
    if !resp.status().is_success() {
        return Err(ClientError::new(ErrorKind::HandshakeFailure, "HELLO rejected by server").with_endpoint(endpoint));
    }
    let codes: Vec<u16> = resp.value.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
    Ok(FeatureSet::from_codes(&codes))
}

async fn sasl_list_mechs<S>(stream: &mut S, buf: &mut Vec<u8>, opaque: &mut OpaqueCounter, endpoint: &str) -> Result<Vec<u8>, ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let req = request(OpCode::SaslListMechs, opaque.next(), Vec::new(), Vec::new(), Vec::new());
    let resp = roundtrip(stream, buf, &req).await?;
    if !resp.status().is_success() {
        return Err(ClientError::new(ErrorKind::AuthenticationFailure, "SASL_LIST_MECHS failed").with_endpoint(endpoint));
    }
    Ok(resp.value)
}

async fn sasl_authenticate<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    opaque: &mut OpaqueCounter,
    opts: &ClusterOptions,
    endpoint: &str,
) -> Result<(), ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mechanisms = opts.effective_sasl_mechanisms();
    let mut last_err = ClientError::new(ErrorKind::AuthenticationFailure, "no SASL mechanisms configured").with_endpoint(endpoint);

    for mechanism in mechanisms {
        match try_mechanism(stream, buf, opaque, mechanism, opts, endpoint).await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

async fn try_mechanism<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    opaque: &mut OpaqueCounter,
    mechanism: SaslMechanism,
    opts: &ClusterOptions,
    endpoint: &str,
) -> Result<(), ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match mechanism {
        SaslMechanism::Plain => {
            let initial = plain_initial_response(&opts.credentials.username, &opts.credentials.password);
            let req = request(OpCode::SaslAuth, opaque.next(), Vec::new(), mechanism.name().as_bytes().to_vec(), initial);
            let resp = roundtrip(stream, buf, &req).await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(ClientError::new(ErrorKind::AuthenticationFailure, "PLAIN auth rejected").with_endpoint(endpoint))
            }
        }
        scram_mechanism => {
            let mut client = ScramClient::new(scram_mechanism, &opts.credentials.username, &opts.credentials.password);
            let first = client.client_first_message();
            let req = request(OpCode::SaslAuth, opaque.next(), Vec::new(), scram_mechanism.name().as_bytes().to_vec(), first);
            let resp = roundtrip(stream, buf, &req).await?;
            if resp.status() != Status::AUTH_CONTINUE {
                return Err(ClientError::new(ErrorKind::AuthenticationFailure, "SCRAM server-first rejected").with_endpoint(endpoint));
            }
            let client_final = client
                .handle_server_first(&resp.value)
                .map_err(|_| ClientError::new(ErrorKind::AuthenticationFailure, "malformed SCRAM server-first message").with_endpoint(endpoint))?;

            let step_req = request(OpCode::SaslStep, opaque.next(), Vec::new(), Vec::new(), client_final);
            let step_resp = roundtrip(stream, buf, &step_req).await?;
            if !step_resp.status().is_success() {
                return Err(ClientError::new(ErrorKind::AuthenticationFailure, "SCRAM step rejected").with_endpoint(endpoint));
            }
            client
                .verify_server_final(&step_resp.value)
                .map_err(|_| ClientError::new(ErrorKind::AuthenticationFailure, "SCRAM server signature mismatch").with_endpoint(endpoint))
        }
    }
}

async fn get_error_map<S>(stream: &mut S, buf: &mut Vec<u8>, opaque: &mut OpaqueCounter, endpoint: &str) -> Result<ErrorMap, ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let req = request(OpCode::GetErrorMap, opaque.next(), Vec::new(), Vec::new(), 2u16.to_be_bytes().to_vec());
    let resp = roundtrip(stream, buf, &req).await?;
    if !resp.status().is_success() {
        return Err(ClientError::new(ErrorKind::HandshakeFailure, "GET_ERROR_MAP failed").with_endpoint(endpoint));
    }
    let text = std::str::from_utf8(&resp.value).map_err(|_| ClientError::new(ErrorKind::ProtocolError, "error map is not UTF-8").with_endpoint(endpoint))?;
    ErrorMap::parse(text).map_err(|e| ClientError::new(ErrorKind::ProtocolError, format!("invalid error map JSON: {e}")).with_endpoint(endpoint))
}

async fn select_bucket<S>(stream: &mut S, buf: &mut Vec<u8>, opaque: &mut OpaqueCounter, bucket: &str, endpoint: &str) -> Result<(), ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let req = request(OpCode::SelectBucket, opaque.next(), Vec::new(), bucket.as_bytes().to_vec(), Vec::new());
    let resp = roundtrip(stream, buf, &req).await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    // spec.md §4.3.1 step 5: distinguish "no such bucket yet" from "no access".
    if status == Status::NOT_FOUND {
        Err(ClientError::new(ErrorKind::ConfigurationNotAvailable, "bucket not yet available").with_endpoint(endpoint))
    } else if status == Status::NO_ACCESS {
        Err(ClientError::new(ErrorKind::BucketNotFound, "bucket not found or not accessible").with_endpoint(endpoint))
    } else {
        Err(ClientError::new(ErrorKind::HandshakeFailure, "SELECT_BUCKET failed").with_endpoint(endpoint))
    }
}

async fn get_cluster_config<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    opaque: &mut OpaqueCounter,
    bucket_bound: bool,
    endpoint: &str,
) -> Result<ClusterConfig, ClientError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let req = request(OpCode::GetClusterConfig, opaque.next(), Vec::new(), Vec::new(), Vec::new());
    let resp = roundtrip(stream, buf, &req).await?;
    let status = resp.status();

    if status == Status::NO_BUCKET && !bucket_bound {
        // Server doesn't support GCCCP on a bucket-less session; fabricate a
        // blank config so upper layers can still issue cluster-level commands
        // (spec.md §4.3.1 step 6).
        return Ok(ClusterConfig::blank());
    }
    if !status.is_success() {
        return Err(ClientError::new(ErrorKind::ConfigurationNotAvailable, "GET_CLUSTER_CONFIG failed").with_endpoint(endpoint));
    }

    let text = std::str::from_utf8(&resp.value).map_err(|_| ClientError::new(ErrorKind::ProtocolError, "cluster config is not UTF-8").with_endpoint(endpoint))?;
    let config = ClusterConfig::parse(text).map_err(|e| ClientError::new(ErrorKind::ProtocolError, format!("invalid cluster config JSON: {e}")).with_endpoint(endpoint))?;

    if !config.has_usable_vbucket_map() {
        return Err(ClientError::new(ErrorKind::ConfigurationNotAvailable, "cluster config has an empty vbucket map; retry bootstrap").with_endpoint(endpoint));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ClusterOptionsBuilder, Credentials};
    use kv_protocol::{encode, HelloFeature};

    fn opts() -> ClusterOptions {
        ClusterOptionsBuilder::new(
            vec!["node1:11210".into()],
            Credentials { username: "alice".into(), password: "hunter2".into() },
        )
        .bucket("travel-sample")
        .build()
        .unwrap()
    }

    /// Drives `bootstrap()` against an in-memory duplex stream whose "server"
    /// side is a hand-written responder, exercising the full HELLO → SASL
    /// PLAIN → GET_ERROR_MAP → SELECT_BUCKET → GET_CLUSTER_CONFIG chain.
    #[tokio::test]
    async fn full_bootstrap_chain_over_tls_uses_plain() {
        let mut opts = opts();
        opts.use_tls = true;

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let server_task = tokio::spawn(async move {
            let mut buf = Vec::new();

            let hello_req = read_one_frame(&mut server, &mut buf).await.unwrap();
            assert_eq!(hello_req.opcode, OpCode::Hello);
            let mut hello_value = Vec::new();
            hello_value.extend_from_slice(&HelloFeature::Xerror.code().to_be_bytes());
            hello_value.extend_from_slice(&HelloFeature::SelectBucket.code().to_be_bytes());
            let hello_resp = response(hello_req.opaque, Status::SUCCESS, hello_value);
            write_frame(&mut server, &hello_resp).await.unwrap();

            let list_req = read_one_frame(&mut server, &mut buf).await.unwrap();
            assert_eq!(list_req.opcode, OpCode::SaslListMechs);
            write_frame(&mut server, &response(list_req.opaque, Status::SUCCESS, b"PLAIN".to_vec())).await.unwrap();

            let auth_req = read_one_frame(&mut server, &mut buf).await.unwrap();
            assert_eq!(auth_req.opcode, OpCode::SaslAuth);
            assert_eq!(auth_req.key, b"PLAIN");
            write_frame(&mut server, &response(auth_req.opaque, Status::SUCCESS, Vec::new())).await.unwrap();

            let errmap_req = read_one_frame(&mut server, &mut buf).await.unwrap();
            assert_eq!(errmap_req.opcode, OpCode::GetErrorMap);
            let map_json = r#"{"errors":{"0x86":{"name":"TMPFAIL","desc":"temp","attrs":["temp","retry-later"]}}}"#;
            write_frame(&mut server, &response(errmap_req.opaque, Status::SUCCESS, map_json.as_bytes().to_vec())).await.unwrap();

            let select_req = read_one_frame(&mut server, &mut buf).await.unwrap();
            assert_eq!(select_req.opcode, OpCode::SelectBucket);
            write_frame(&mut server, &response(select_req.opaque, Status::SUCCESS, Vec::new())).await.unwrap();

            let config_req = read_one_frame(&mut server, &mut buf).await.unwrap();
            assert_eq!(config_req.opcode, OpCode::GetClusterConfig);
            let config_json = r#"{"rev":1,"revEpoch":1,"nodesExt":[{"hostname":"node1","services":{"kv":11210},"thisNode":true}],"vBucketServerMap":{"serverList":["node1:11210"],"vBucketMap":[[0]]}}"#;
            write_frame(&mut server, &response(config_req.opaque, Status::SUCCESS, config_json.as_bytes().to_vec())).await.unwrap();
        });

        let outcome = bootstrap(&mut client, &opts, "node1:11210").await.unwrap();
        server_task.await.unwrap();

        assert!(outcome.negotiated_features.contains(HelloFeature::Xerror));
        assert!(outcome.error_map.unwrap().get(0x86).unwrap().name == "TMPFAIL");
        assert_eq!(outcome.config.order_key(), (1, 1));
    }

    fn response(opaque: u32, status: Status, value: Vec<u8>) -> Packet {
        Packet {
            magic: Magic::Response,
            opcode: OpCode::Hello,
            datatype: DataType::RAW,
            vbucket_or_status: status.0,
            opaque,
            cas: 0,
            framing_extras: Vec::new(),
            extras: Vec::new(),
            collection_uid: None,
            key: Vec::new(),
            value,
        }
    }

    #[test]
    fn encode_is_reachable_from_this_module_for_helpers() {
        let _ = encode(&request(OpCode::Noop, 1, Vec::new(), Vec::new(), Vec::new()));
    }
}
