//! TCP proxying with SNI-based target selection.
//!
//! # Responsibilities
//! - Read the first TLS record from an accepted connection
//! - Extract the SNI host name from the ClientHello
//! - Look up a `host/` route and splice bytes to its target
//!
//! # Design Decisions
//! - No TLS termination: the buffered ClientHello is replayed to the
//!   upstream and the streams are spliced verbatim
//! - Parse failures and unknown hosts close the connection

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::route::{Picker, SharedTable};

/// Serve one accepted connection.
pub async fn handle(mut inbound: TcpStream, table: Arc<SharedTable>, picker: Picker) {
    let hello = match read_client_hello(&mut inbound).await {
        Ok(h) => h,
        Err(e) => {
            tracing::debug!(error = %e, "tcp+sni: cannot read ClientHello");
            return;
        }
    };

    let Some(host) = extract_sni(&hello) else {
        tracing::debug!("tcp+sni: no SNI in ClientHello");
        return;
    };

    let current = table.current();
    let Some(target) = current.lookup_host(&host, picker) else {
        tracing::debug!(host = %host, "tcp+sni: no route");
        return;
    };

    let addr = match (target.url.host_str(), target.url.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        _ => {
            tracing::warn!(host = %host, url = %target.url, "tcp+sni: target has no host:port");
            return;
        }
    };

    let mut upstream = match TcpStream::connect(&addr).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(upstream = %addr, error = %e, "tcp+sni: cannot dial upstream");
            return;
        }
    };

    if upstream.write_all(&hello).await.is_err() {
        return;
    }

    match tokio::io::copy_bidirectional(&mut inbound, &mut upstream).await {
        Ok((rx, tx)) => {
            tracing::debug!(host = %host, upstream = %addr, rx, tx, "tcp+sni: connection closed");
        }
        Err(e) => {
            tracing::debug!(host = %host, upstream = %addr, error = %e, "tcp+sni: splice ended");
        }
    }
}

/// Read exactly the first TLS record (the ClientHello) and return the
/// raw bytes including the record header.
async fn read_client_hello(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await?;
    if header[0] != 0x16 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "not a TLS handshake record",
        ));
    }
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut record = vec![0u8; len];
    stream.read_exact(&mut record).await?;

    let mut hello = Vec::with_capacity(5 + len);
    hello.extend_from_slice(&header);
    hello.extend_from_slice(&record);
    Ok(hello)
}

/// Extract the server_name extension from a TLS ClientHello, record
/// header included.
pub fn extract_sni(client_hello: &[u8]) -> Option<String> {
    if client_hello.len() < 43 {
        return None;
    }

    // Skip record header (5), handshake header (4), version (2),
    // random (32).
    let mut offset = 5 + 4 + 2 + 32;

    // Session ID.
    let session_id_len = *client_hello.get(offset)? as usize;
    offset += 1 + session_id_len;

    // Cipher suites.
    let cipher_suites_len = u16::from_be_bytes([
        *client_hello.get(offset)?,
        *client_hello.get(offset + 1)?,
    ]) as usize;
    offset += 2 + cipher_suites_len;

    // Compression methods.
    let compression_len = *client_hello.get(offset)? as usize;
    offset += 1 + compression_len;

    // Extensions.
    let extensions_len = u16::from_be_bytes([
        *client_hello.get(offset)?,
        *client_hello.get(offset + 1)?,
    ]) as usize;
    offset += 2;
    let extensions_end = offset + extensions_len;
    if extensions_end > client_hello.len() {
        return None;
    }

    while offset + 4 <= extensions_end {
        let ext_type = u16::from_be_bytes([client_hello[offset], client_hello[offset + 1]]);
        let ext_len =
            u16::from_be_bytes([client_hello[offset + 2], client_hello[offset + 3]]) as usize;
        offset += 4;

        if ext_type == 0x0000 {
            return parse_sni_extension(client_hello.get(offset..offset + ext_len)?);
        }
        offset += ext_len;
    }

    None
}

/// Parse the server_name extension payload.
fn parse_sni_extension(data: &[u8]) -> Option<String> {
    if data.len() < 5 {
        return None;
    }

    // server_name_list length (2), then the first entry.
    let mut offset = 2;
    if data[offset] != 0 {
        // Only host_name entries are defined.
        return None;
    }
    offset += 1;

    let name_len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
    offset += 2;

    let name = data.get(offset..offset + name_len)?;
    let hostname = String::from_utf8(name.to_vec()).ok()?;
    if hostname.is_empty() {
        return None;
    }
    Some(hostname)
}
