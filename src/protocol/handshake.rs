//! Initial handshake and authentication over `mysql_native_password`,
//! including the auth-switch retry path.

use crate::error::{Error, Result};
use crate::protocol::packet::Cursor;
use crate::util::mysql_password::scramble411;

const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;

const CLIENT_FLAGS: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_PROTOCOL_41
    | CLIENT_SECURE_CONNECTION
    | CLIENT_PLUGIN_AUTH
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_MULTI_RESULTS;

const MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;
const UTF8_GENERAL_CI: u8 = 33;
const UTF8MB4_GENERAL_CI: u8 = 45;
const LATIN1_SWEDISH_CI: u8 = 8;
const BINARY: u8 = 63;

/// Maps a configured character-set name onto the collation id the handshake
/// carries; unknown names fall back to `utf8`.
pub fn charset_id(name: &str) -> u8 {
    match name.to_ascii_lowercase().as_str() {
        "utf8mb4" | "utf8mb4_general_ci" => UTF8MB4_GENERAL_CI,
        "latin1" | "latin1_swedish_ci" => LATIN1_SWEDISH_CI,
        "binary" => BINARY,
        _ => UTF8_GENERAL_CI,
    }
}

/// The server's initial handshake packet (protocol version 10).
#[derive(Debug)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: u32,
    pub auth_plugin_name: String,
}

/// 5.5.x servers predate the replication capabilities this client's session
/// setup relies on; callers fall back to replaying binlog files from disk.
pub fn is_legacy_server(server_version: &str) -> bool {
    server_version.starts_with("5.5.")
}

pub fn parse_server_handshake(payload: &[u8]) -> Result<ServerHandshake> {
    let mut cursor = Cursor::new(payload);
    let protocol_version = cursor.u8()?;
    if protocol_version != 10 {
        return Err(Error::Protocol(format!(
            "unsupported handshake protocol version {protocol_version}"
        )));
    }
    let server_version = cursor.null_terminated_string()?;
    let connection_id = cursor.u32_le()?;

    let mut auth_plugin_data = cursor.take(8)?.to_vec();
    cursor.u8()?; // filler

    let capability_lower = cursor.u16_le()? as u32;
    let _charset = cursor.u8()?;
    let _status_flags = cursor.u16_le()?;
    let capability_upper = cursor.u16_le()? as u32;
    let capability_flags = capability_lower | (capability_upper << 16);

    let auth_data_len = cursor.u8()?;
    cursor.take(10)?; // reserved

    if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
        let remaining_len = std::cmp::max(13, (auth_data_len as usize).saturating_sub(8));
        let rest = cursor.take(remaining_len)?;
        // Drop the trailing NUL the server pads the scramble with.
        let trimmed = rest.split(|&b| b == 0).next().unwrap_or(rest);
        auth_plugin_data.extend_from_slice(trimmed);
    }

    let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 {
        cursor.null_terminated_string().unwrap_or_default()
    } else {
        String::new()
    };

    Ok(ServerHandshake {
        protocol_version,
        server_version,
        connection_id,
        auth_plugin_data,
        capability_flags,
        auth_plugin_name,
    })
}

/// Builds the client's `HandshakeResponse41` packet authenticating with
/// `mysql_native_password`.
pub fn build_handshake_response(
    handshake: &ServerHandshake,
    user: &str,
    password: &str,
    database: &str,
    charset: u8,
) -> Vec<u8> {
    let scrambled = scramble411(password.as_bytes(), &handshake.auth_plugin_data);

    let mut buf = Vec::new();
    buf.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    buf.extend_from_slice(&MAX_PACKET_SIZE.to_le_bytes());
    buf.push(charset);
    buf.extend_from_slice(&[0u8; 23]); // reserved

    buf.extend_from_slice(user.as_bytes());
    buf.push(0);

    buf.push(scrambled.len() as u8);
    buf.extend_from_slice(&scrambled);

    if !database.is_empty() {
        buf.extend_from_slice(database.as_bytes());
        buf.push(0);
    }

    buf.extend_from_slice(b"mysql_native_password");
    buf.push(0);

    buf
}

/// The server requested a different auth plugin; we only know
/// `mysql_native_password`, so re-scramble with the new seed it sends.
pub fn build_auth_switch_response(password: &str, new_seed: &[u8]) -> Vec<u8> {
    scramble411(password.as_bytes(), new_seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_detection_only_matches_5_5() {
        assert!(is_legacy_server("5.5.62-log"));
        assert!(!is_legacy_server("5.6.51"));
        assert!(!is_legacy_server("8.0.30"));
        assert!(!is_legacy_server("10.5.5-MariaDB"));
    }

    #[test]
    fn rejects_unsupported_protocol_version() {
        let payload = [9u8, 0, 0, 0];
        let err = parse_server_handshake(&payload).unwrap_err();
        assert!(err.to_string().contains("protocol version"));
    }

    #[test]
    fn handshake_response_contains_username_and_db() {
        let handshake = ServerHandshake {
            protocol_version: 10,
            server_version: "8.0.30".into(),
            connection_id: 42,
            auth_plugin_data: b"01234567890123456789".to_vec(),
            capability_flags: CLIENT_PLUGIN_AUTH | CLIENT_SECURE_CONNECTION,
            auth_plugin_name: "mysql_native_password".into(),
        };
        let response = build_handshake_response(&handshake, "repl", "secret", "testdb", charset_id("utf8mb4"));
        let response_str = String::from_utf8_lossy(&response);
        assert!(response_str.contains("repl"));
        assert!(response_str.contains("testdb"));
        assert!(response_str.contains("mysql_native_password"));
    }

    #[test]
    fn charset_names_map_to_collation_ids() {
        assert_eq!(charset_id("utf8mb4"), 45);
        assert_eq!(charset_id("UTF8MB4"), 45);
        assert_eq!(charset_id("latin1"), 8);
        assert_eq!(charset_id("utf8"), 33);
        assert_eq!(charset_id("no-such-charset"), 33);
    }
}
