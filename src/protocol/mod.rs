pub mod connection;
pub mod handshake;
pub mod packet;

pub use connection::MysqlConnection;
