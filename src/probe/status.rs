// src/probe/status.rs
use byteorder::{BigEndian, WriteBytesExt};
use log::debug;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use super::{with_timeout, ProbeError};
use crate::models::server::{Players, ServerVersion, StatusResult};

const MAX_RESPONSE_LEN: i32 = 2 * 1024 * 1024;

/// Server List Ping: handshake into the status state, then ask for the JSON
/// status document.
pub async fn ping(target: SocketAddr, host: &str, io_timeout: Duration) -> Result<StatusResult, ProbeError> {
    let mut stream = with_timeout(io_timeout, TcpStream::connect(target)).await?;

    let mut request = handshake_packet(host, target.port())?;
    request.extend(frame(&[0x00]));
    with_timeout(io_timeout, stream.write_all(&request)).await?;

    let json = with_timeout(io_timeout, read_status_response(&mut stream)).await?;
    debug!("Status response from {} ({} bytes)", target, json.len());

    parse_status(&json)
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
}

pub(crate) async fn read_varint<R>(reader: &mut R) -> Result<i32, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let mut result: u32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await?;
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ProbeError::Protocol("VarInt is too long".into()))
}

pub(crate) fn frame(body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(body.len() + 5);
    write_varint(&mut packet, body.len() as i32);
    packet.extend_from_slice(body);
    packet
}

fn handshake_packet(host: &str, port: u16) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(host.len() + 16);
    write_varint(&mut body, 0x00);
    // -1 asks the server to answer with whatever version it runs
    write_varint(&mut body, -1);
    write_varint(&mut body, host.len() as i32);
    body.extend_from_slice(host.as_bytes());
    WriteBytesExt::write_u16::<BigEndian>(&mut body, port)?;
    write_varint(&mut body, 1);
    Ok(frame(&body))
}

async fn read_status_response<R>(reader: &mut R) -> Result<String, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let _packet_len = read_varint(reader).await?;
    let packet_id = read_varint(reader).await?;
    if packet_id != 0x00 {
        return Err(ProbeError::Protocol(format!("unexpected packet id {}", packet_id)));
    }

    let len = read_varint(reader).await?;
    if !(0..=MAX_RESPONSE_LEN).contains(&len) {
        return Err(ProbeError::Protocol(format!("invalid status length {}", len)));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ProbeError::Protocol("status is not valid UTF-8".into()))
}

pub(crate) fn parse_status(json: &str) -> Result<StatusResult, ProbeError> {
    let doc: Value = serde_json::from_str(json)
        .map_err(|e| ProbeError::Protocol(format!("invalid status JSON: {}", e)))?;

    let version = ServerVersion {
        name: doc["version"]["name"].as_str().unwrap_or_default().to_string(),
        protocol: doc["version"]["protocol"].as_i64().unwrap_or_default() as i32,
    };
    let players = Players {
        max: doc["players"]["max"].as_i64().unwrap_or_default() as i32,
        now: doc["players"]["online"].as_i64().unwrap_or_default() as i32,
    };

    Ok(StatusResult {
        motd: flatten_chat(&doc["description"]),
        favicon: doc["favicon"].as_str().map(str::to_string),
        players,
        version,
    })
}

/// Collapses a chat component (string, object with `text`/`extra`, or array)
/// into plain text.
fn flatten_chat(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().map(flatten_chat).collect(),
        Value::Object(map) => {
            let mut text = map
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(extra) = map.get("extra") {
                text.push_str(&flatten_chat(extra));
            }
            text
        }
        _ => String::new(),
    }
}
