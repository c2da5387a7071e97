pub mod header;
pub mod http;
