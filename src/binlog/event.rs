//! Binlog event type constants and header/body structs for the event kinds
//! this engine handles; MariaDB-only and pre-5.0 kinds are left out.

pub mod event_type {
    pub const QUERY_EVENT: u8 = 2;
    pub const STOP_EVENT: u8 = 3;
    pub const ROTATE_EVENT: u8 = 4;
    pub const INTVAR_EVENT: u8 = 5;
    pub const XID_EVENT: u8 = 16;
    pub const FORMAT_DESCRIPTION_EVENT: u8 = 15;
    pub const TABLE_MAP_EVENT: u8 = 19;
    pub const WRITE_ROWS_EVENT_V1: u8 = 23;
    pub const UPDATE_ROWS_EVENT_V1: u8 = 24;
    pub const DELETE_ROWS_EVENT_V1: u8 = 25;
    pub const HEARTBEAT_LOG_EVENT: u8 = 27;
    pub const WRITE_ROWS_EVENT: u8 = 30;
    pub const UPDATE_ROWS_EVENT: u8 = 31;
    pub const DELETE_ROWS_EVENT: u8 = 32;
    pub const GTID_LOG_EVENT: u8 = 33;
    pub const ANONYMOUS_GTID_LOG_EVENT: u8 = 34;
    pub const PREVIOUS_GTIDS_LOG_EVENT: u8 = 35;
}

pub mod column_type {
    pub const DECIMAL: u8 = 0;
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const NULL: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const DATETIME: u8 = 12;
    pub const YEAR: u8 = 13;
    pub const NEWDATE: u8 = 14;
    pub const VARCHAR: u8 = 15;
    pub const BIT: u8 = 16;
    pub const TIMESTAMP2: u8 = 17;
    pub const DATETIME2: u8 = 18;
    pub const TIME2: u8 = 19;
    pub const JSON: u8 = 245;
    pub const NEWDECIMAL: u8 = 246;
    pub const ENUM: u8 = 247;
    pub const SET: u8 = 248;
    pub const TINY_BLOB: u8 = 249;
    pub const MEDIUM_BLOB: u8 = 250;
    pub const LONG_BLOB: u8 = 251;
    pub const BLOB: u8 = 252;
    pub const VAR_STRING: u8 = 253;
    pub const STRING: u8 = 254;
    pub const GEOMETRY: u8 = 255;
}

pub const EVENT_HEADER_LEN: usize = 19;
pub const BINLOG_CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct EventHeader {
    pub timestamp: u32,
    pub event_type: u8,
    pub server_id: u32,
    pub event_length: u32,
    pub next_position: u32,
    pub flags: u16,
}

#[derive(Debug, Clone)]
pub struct FormatDescriptionEvent {
    pub binlog_version: u16,
    pub server_version: String,
    pub header_length: u8,
    pub checksum_present: bool,
}

#[derive(Debug, Clone)]
pub struct RotateEvent {
    pub next_position: u64,
    pub next_file: String,
}

#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub database: String,
    pub query: String,
}

#[derive(Debug, Clone, Copy)]
pub struct XidEvent {
    pub xid: u64,
}

#[derive(Debug, Clone)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub database: String,
    pub table: String,
    pub column_types: Vec<u8>,
    pub column_metadata: Vec<u16>,
    pub nullable: Vec<bool>,
}

#[derive(Debug, Clone)]
pub enum RowsPayload {
    Write(Vec<Vec<crate::model::Value>>),
    Update(Vec<(Vec<crate::model::Value>, Vec<crate::model::Value>)>),
    Delete(Vec<Vec<crate::model::Value>>),
}

#[derive(Debug, Clone)]
pub struct RowsEvent {
    pub table_id: u64,
    pub payload: RowsPayload,
}

#[derive(Debug, Clone)]
pub enum Event {
    FormatDescription(FormatDescriptionEvent),
    Rotate(RotateEvent),
    Query(QueryEvent),
    Xid(XidEvent),
    TableMap(TableMapEvent),
    Rows(RowsEvent),
    Heartbeat,
    Unknown(u8),
}
