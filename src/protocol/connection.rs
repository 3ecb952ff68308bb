//! A small blocking MySQL client connection, used both by the schema cache
//! for `information_schema` lookups and by the stream consumer to register
//! as a replica and start the binlog dump.

use std::time::Duration;

use crate::channel::{SocketChannel, TcpChannel};
use crate::error::{Error, Result};
use crate::protocol::handshake::{
    build_auth_switch_response, build_handshake_response, charset_id, parse_server_handshake,
};
use crate::protocol::packet::{
    read_packet, write_packet, Cursor, EOF_PACKET, ERR_PACKET, OK_PACKET,
};

const COM_QUIT: u8 = 0x01;
const COM_QUERY: u8 = 0x03;
const COM_BINLOG_DUMP: u8 = 0x12;
const COM_REGISTER_SLAVE: u8 = 0x15;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

pub struct MysqlConnection {
    channel: TcpChannel,
    seq: u8,
    timeout: Duration,
    server_version: String,
}

impl MysqlConnection {
    pub fn connect(host: &str, port: u16, user: &str, password: &str, database: &str, charset: &str) -> Result<Self> {
        let mut channel = TcpChannel::connect(host, port, DEFAULT_TIMEOUT)?;
        let (seq, payload) = read_packet(&mut channel, DEFAULT_TIMEOUT)?;
        if payload.first() == Some(&ERR_PACKET) {
            return Err(crate::protocol::packet::parse_err_packet(&payload[1..]));
        }
        let handshake = parse_server_handshake(&payload)?;

        let response = build_handshake_response(&handshake, user, password, database, charset_id(charset));
        write_packet(&mut channel, seq + 1, &response)?;

        let (_, reply) = read_packet(&mut channel, DEFAULT_TIMEOUT)?;
        let mut conn = Self {
            channel,
            seq: seq + 2,
            timeout: DEFAULT_TIMEOUT,
            server_version: handshake.server_version.clone(),
        };
        conn.finish_auth(reply, password)?;
        Ok(conn)
    }

    /// The version string the server announced in its handshake, e.g.
    /// `5.5.62-log` or `8.0.30`. Used to pick the legacy-server replay path
    /// for 5.5.x primaries, which cannot serve this client's replication
    /// session.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    fn finish_auth(&mut self, reply: Vec<u8>, password: &str) -> Result<()> {
        match reply.first() {
            Some(&OK_PACKET) => Ok(()),
            Some(&ERR_PACKET) => Err(crate::protocol::packet::parse_err_packet(&reply[1..])),
            Some(0xfe) => {
                // Auth switch request: re-scramble with the new seed and retry once.
                let mut cursor = Cursor::new(&reply[1..]);
                let _plugin = cursor.null_terminated_string().unwrap_or_default();
                let seed = cursor.take_rest().to_vec();
                let response = build_auth_switch_response(password, &seed);
                let seq = self.next_seq();
                write_packet(&mut self.channel, seq, &response)?;
                let (_, final_reply) = read_packet(&mut self.channel, self.timeout)?;
                match final_reply.first() {
                    Some(&OK_PACKET) => Ok(()),
                    Some(&ERR_PACKET) => Err(crate::protocol::packet::parse_err_packet(&final_reply[1..])),
                    _ => Err(Error::Protocol("unexpected auth switch reply".into())),
                }
            }
            _ => Err(Error::Protocol("unexpected handshake reply".into())),
        }
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    fn send_command(&mut self, command: u8, body: &[u8]) -> Result<()> {
        self.seq = 0;
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(command);
        payload.extend_from_slice(body);
        let seq = self.next_seq();
        write_packet(&mut self.channel, seq, &payload)
    }

    /// Runs a query expected to return a text-protocol result set, used by
    /// the Schema Cache's `information_schema` lookups.
    pub fn query(&mut self, sql: &str) -> Result<ResultSet> {
        self.send_command(COM_QUERY, sql.as_bytes())?;

        let (_, first) = read_packet(&mut self.channel, self.timeout)?;
        if first.first() == Some(&ERR_PACKET) {
            return Err(crate::protocol::packet::parse_err_packet(&first[1..]));
        }
        if first.first() == Some(&OK_PACKET) {
            return Ok(ResultSet { columns: Vec::new(), rows: Vec::new() });
        }

        let mut cursor = Cursor::new(&first);
        let column_count = cursor.length_encoded_int()? as usize;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let (_, col_payload) = read_packet(&mut self.channel, self.timeout)?;
            columns.push(parse_column_name(&col_payload)?);
        }
        self.expect_eof()?;

        let mut rows = Vec::new();
        loop {
            let (_, row_payload) = read_packet(&mut self.channel, self.timeout)?;
            if row_payload.first() == Some(&EOF_PACKET) && row_payload.len() < 9 {
                break;
            }
            if row_payload.first() == Some(&ERR_PACKET) {
                return Err(crate::protocol::packet::parse_err_packet(&row_payload[1..]));
            }
            rows.push(parse_text_row(&row_payload, column_count)?);
        }

        Ok(ResultSet { columns, rows })
    }

    fn expect_eof(&mut self) -> Result<()> {
        let (_, payload) = read_packet(&mut self.channel, self.timeout)?;
        if payload.first() != Some(&EOF_PACKET) {
            return Err(Error::Protocol("expected EOF packet after column definitions".into()));
        }
        Ok(())
    }

    /// Registers as a replica so the primary will stream binlog events to
    /// this connection rather than treat it as an ordinary client.
    pub fn register_slave(&mut self, server_id: u32, reported_host: &str) -> Result<()> {
        let mut body = Vec::new();
        body.extend_from_slice(&server_id.to_le_bytes());
        body.push(reported_host.len() as u8);
        body.extend_from_slice(reported_host.as_bytes());
        body.push(0); // user
        body.push(0); // password
        body.extend_from_slice(&0u16.to_le_bytes()); // port
        body.extend_from_slice(&0u32.to_le_bytes()); // replication rank (unused)
        body.extend_from_slice(&0u32.to_le_bytes()); // master id

        self.send_command(COM_REGISTER_SLAVE, &body)?;
        let (_, reply) = read_packet(&mut self.channel, self.timeout)?;
        if reply.first() == Some(&ERR_PACKET) {
            return Err(crate::protocol::packet::parse_err_packet(&reply[1..]));
        }
        Ok(())
    }

    /// Issues `COM_BINLOG_DUMP` and hands the connection over to streaming
    /// mode: from here on the caller reads raw packets directly with
    /// [`MysqlConnection::read_raw_packet`] rather than [`query`].
    pub fn start_dump(&mut self, server_id: u32, binlog_file: &str, binlog_pos: u32) -> Result<()> {
        let mut body = Vec::new();
        body.extend_from_slice(&binlog_pos.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes()); // flags
        body.extend_from_slice(&server_id.to_le_bytes());
        body.extend_from_slice(binlog_file.as_bytes());

        self.send_command(COM_BINLOG_DUMP, &body)
    }

    /// Reads the next raw packet off the wire while streaming binlog events.
    /// A leading `0x00` marks a normal event; `0xff` marks an error.
    pub fn read_raw_packet(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let (_, payload) = read_packet(&mut self.channel, timeout)?;
        if payload.first() == Some(&ERR_PACKET) {
            return Err(crate::protocol::packet::parse_err_packet(&payload[1..]));
        }
        Ok(payload)
    }

    pub fn quit(&mut self) -> Result<()> {
        self.send_command(COM_QUIT, &[])?;
        self.channel.close()
    }
}

fn parse_column_name(payload: &[u8]) -> Result<String> {
    let mut cursor = Cursor::new(payload);
    cursor.length_encoded_string()?; // catalog
    cursor.length_encoded_string()?; // schema
    cursor.length_encoded_string()?; // table alias
    cursor.length_encoded_string()?; // table
    let name = cursor.length_encoded_string()?;
    Ok(String::from_utf8_lossy(&name).into_owned())
}

fn parse_text_row(payload: &[u8], column_count: usize) -> Result<Vec<Option<String>>> {
    let mut cursor = Cursor::new(payload);
    let mut values = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        if cursor.peek_u8() == Some(0xfb) {
            cursor.take(1)?;
            values.push(None);
            continue;
        }
        let bytes = cursor.length_encoded_string()?;
        values.push(Some(String::from_utf8_lossy(&bytes).into_owned()));
    }
    Ok(values)
}
