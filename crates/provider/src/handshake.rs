//! Provider plugin handshake (go-plugin protocol).
//!
//! The handshake is the sole part of the wire protocol this crate implements
//! by hand: a magic-cookie environment variable, followed by a single
//! pipe-delimited line on the child's stdout advertising where to dial.

use std::time::Duration;

use base64::Engine;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use infractl_core::{Error, Result};

/// Magic cookie environment variable key required by the go-plugin handshake.
pub const MAGIC_COOKIE_KEY: &str = "TF_PLUGIN_MAGIC_COOKIE";
/// Magic cookie value identifying this as an OpenTofu-compatible provider host.
pub const MAGIC_COOKIE_VALUE: &str = "d602bf8f470bc67ca7faa0386276bbdd4330efaf76d1a219cb4d6991ca9872b2";

/// Plugin protocol version this host speaks.
pub const PROTOCOL_VERSION: u32 = 5;

/// Result of a successful handshake.
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// Protocol version the provider advertised.
    pub protocol_version: u32,
    /// Network address (`host:port`) for the gRPC connection.
    pub address: String,
    /// Protocol type, expected to be `grpc`.
    pub protocol_type: String,
    /// Base64-encoded server certificate for mTLS, if advertised.
    pub server_cert: Option<String>,
}

impl HandshakeResult {
    /// The gRPC endpoint URI to dial.
    #[must_use]
    pub fn endpoint_uri(&self) -> String {
        if self.server_cert.is_some() {
            format!("https://{}", self.address)
        } else {
            format!("http://{}", self.address)
        }
    }

    /// Decodes the advertised server certificate, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate is not valid base64.
    pub fn decode_server_cert(&self) -> Result<Option<Vec<u8>>> {
        match &self.server_cert {
            Some(cert) => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(cert)
                    .map_err(|e| Error::ProviderLoadFailed {
                        full_name: String::new(),
                        message: format!("failed to decode server certificate: {e}"),
                    })?;
                Ok(Some(decoded))
            }
            None => Ok(None),
        }
    }
}

/// Performs the go-plugin handshake with a freshly spawned provider process.
///
/// Protocol: set the magic cookie env var, spawn the binary, and read one
/// line from stdout of the form
/// `CORE_PROTOCOL|APP_PROTOCOL|NET_TYPE|NET_ADDR|PROTO_TYPE|SERVER_CERT`.
///
/// # Errors
///
/// Returns an error if the process cannot be spawned, exits before
/// completing the handshake, times out, or advertises an unsupported
/// network/protocol type.
#[instrument(name = "provider_handshake", skip(binary_path))]
pub async fn perform_handshake(
    binary_path: &str,
    timeout_duration: Duration,
) -> Result<(Child, HandshakeResult)> {
    debug!(binary_path, "starting provider handshake");

    let mut child = Command::new(binary_path)
        .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::ProviderLoadFailed {
            full_name: binary_path.to_string(),
            message: format!("failed to spawn provider: {e}"),
        })?;

    let stdout = child.stdout.take().ok_or_else(|| Error::ProviderLoadFailed {
        full_name: binary_path.to_string(),
        message: "failed to capture provider stdout".to_string(),
    })?;

    let mut reader = tokio::io::BufReader::new(stdout);
    let mut handshake_line = String::new();

    match timeout(timeout_duration, reader.read_line(&mut handshake_line)).await {
        Ok(Ok(0)) => {
            return Err(Error::ProviderLoadFailed {
                full_name: binary_path.to_string(),
                message: "provider exited without completing handshake".to_string(),
            });
        }
        Ok(Ok(_)) => debug!(line = %handshake_line.trim(), "received handshake line"),
        Ok(Err(e)) => {
            return Err(Error::ProviderLoadFailed {
                full_name: binary_path.to_string(),
                message: format!("failed to read handshake line: {e}"),
            });
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(Error::DeadlineExceeded);
        }
    }

    let result = parse_handshake_line(&handshake_line, binary_path)?;

    if result.protocol_version != PROTOCOL_VERSION {
        warn!(
            expected = PROTOCOL_VERSION,
            actual = result.protocol_version,
            "plugin protocol version mismatch"
        );
    }

    if result.protocol_type != "grpc" {
        return Err(Error::ProviderLoadFailed {
            full_name: binary_path.to_string(),
            message: format!("unsupported protocol type: {} (expected grpc)", result.protocol_type),
        });
    }

    Ok((child, result))
}

fn parse_handshake_line(line: &str, binary_path: &str) -> Result<HandshakeResult> {
    let line = line.trim();
    let parts: Vec<&str> = line.split('|').collect();

    if parts.len() < 5 {
        return Err(Error::ProviderLoadFailed {
            full_name: binary_path.to_string(),
            message: format!(
                "invalid handshake format: expected at least 5 pipe-separated fields, got {}",
                parts.len()
            ),
        });
    }

    let core_protocol: u32 = parts[0].parse().map_err(|_| Error::ProviderLoadFailed {
        full_name: binary_path.to_string(),
        message: format!("invalid core protocol version: {}", parts[0]),
    })?;
    if core_protocol != 1 {
        return Err(Error::ProviderLoadFailed {
            full_name: binary_path.to_string(),
            message: format!("unsupported core protocol version: {core_protocol}"),
        });
    }

    let app_protocol: u32 = parts[1].parse().map_err(|_| Error::ProviderLoadFailed {
        full_name: binary_path.to_string(),
        message: format!("invalid app protocol version: {}", parts[1]),
    })?;

    let net_type = parts[2];
    if net_type != "tcp" && net_type != "unix" {
        return Err(Error::ProviderLoadFailed {
            full_name: binary_path.to_string(),
            message: format!("unsupported network type: {net_type}"),
        });
    }

    let address = parts[3].to_string();
    let protocol_type = parts[4].to_string();
    let server_cert = if parts.len() > 5 && !parts[5].is_empty() {
        Some(parts[5].to_string())
    } else {
        None
    };

    Ok(HandshakeResult { protocol_version: app_protocol, address, protocol_type, server_cert })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_handshake_line_without_cert() {
        let result = parse_handshake_line("1|5|tcp|127.0.0.1:12345|grpc|", "bin").unwrap();
        assert_eq!(result.protocol_version, 5);
        assert_eq!(result.address, "127.0.0.1:12345");
        assert_eq!(result.protocol_type, "grpc");
        assert!(result.server_cert.is_none());
    }

    #[test]
    fn parses_handshake_line_with_cert() {
        let result = parse_handshake_line("1|5|tcp|127.0.0.1:12345|grpc|c29tZWNlcnQ=", "bin").unwrap();
        assert_eq!(result.server_cert, Some("c29tZWNlcnQ=".to_string()));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_handshake_line("invalid|format", "bin").is_err());
    }

    #[test]
    fn endpoint_uri_reflects_cert_presence() {
        let plain = HandshakeResult {
            protocol_version: 5,
            address: "127.0.0.1:1".to_string(),
            protocol_type: "grpc".to_string(),
            server_cert: None,
        };
        assert_eq!(plain.endpoint_uri(), "http://127.0.0.1:1");

        let tls = HandshakeResult { server_cert: Some("x".to_string()), ..plain };
        assert_eq!(tls.endpoint_uri(), "https://127.0.0.1:1");
    }
}
