// src/probe/query.rs
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::collections::HashMap;
use std::io::{self, BufRead, Cursor};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use super::{with_timeout, ProbeError};
use crate::models::server::{Players, QueryResult};

const MAGIC: [u8; 2] = [0xFE, 0xFD];
const TYPE_STAT: u8 = 0x00;
const TYPE_HANDSHAKE: u8 = 0x09;
// "splitnum\0\x80\0" before the key/value section
const KV_PADDING: u64 = 11;
// "\x01player_\0\0" before the player list
const PLAYER_PADDING: u64 = 10;

/// GameSpy4 full stat: a challenge handshake followed by the stat request,
/// both over a single connected UDP socket.
pub async fn full_stat(target: SocketAddr, io_timeout: Duration) -> Result<QueryResult, ProbeError> {
    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(target).await?;

    let session_id = rand::random::<i32>() & 0x0F0F_0F0F;
    let mut buffer = vec![0u8; 65_535];

    with_timeout(io_timeout, socket.send(&handshake_request(session_id)?)).await?;
    let len = with_timeout(io_timeout, socket.recv(&mut buffer)).await?;
    let token = parse_handshake(&buffer[..len], session_id)?;
    debug!("Query challenge from {}: {}", target, token);

    with_timeout(io_timeout, socket.send(&stat_request(session_id, token)?)).await?;
    let len = with_timeout(io_timeout, socket.recv(&mut buffer)).await?;

    parse_full_stat(&buffer[..len], session_id)
}

fn handshake_request(session_id: i32) -> io::Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(7);
    packet.extend_from_slice(&MAGIC);
    packet.write_u8(TYPE_HANDSHAKE)?;
    packet.write_i32::<BigEndian>(session_id)?;
    Ok(packet)
}

fn stat_request(session_id: i32, token: i32) -> io::Result<Vec<u8>> {
    let mut packet = Vec::with_capacity(15);
    packet.extend_from_slice(&MAGIC);
    packet.write_u8(TYPE_STAT)?;
    packet.write_i32::<BigEndian>(session_id)?;
    packet.write_i32::<BigEndian>(token)?;
    // four padding bytes turn a basic stat into a full stat
    packet.extend_from_slice(&[0x00; 4]);
    Ok(packet)
}

fn read_header(cursor: &mut Cursor<&[u8]>, expected_type: u8, session_id: i32) -> Result<(), ProbeError> {
    let kind = cursor
        .read_u8()
        .map_err(|_| ProbeError::Protocol("empty query response".into()))?;
    if kind != expected_type {
        return Err(ProbeError::Protocol(format!("unexpected packet type {:#04x}", kind)));
    }
    let session = cursor
        .read_i32::<BigEndian>()
        .map_err(|_| ProbeError::Protocol("truncated query header".into()))?;
    if session != session_id {
        return Err(ProbeError::Protocol("session id mismatch".into()));
    }
    Ok(())
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> Result<String, ProbeError> {
    let mut bytes = Vec::new();
    cursor.read_until(0x00, &mut bytes)?;
    match bytes.pop() {
        Some(0x00) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        _ => Err(ProbeError::Protocol("unterminated string".into())),
    }
}

fn skip(cursor: &mut Cursor<&[u8]>, n: u64) -> bool {
    let target = cursor.position() + n;
    if target > cursor.get_ref().len() as u64 {
        return false;
    }
    cursor.set_position(target);
    true
}

pub(crate) fn parse_handshake(packet: &[u8], session_id: i32) -> Result<i32, ProbeError> {
    let mut cursor = Cursor::new(packet);
    read_header(&mut cursor, TYPE_HANDSHAKE, session_id)?;
    let token = read_cstring(&mut cursor)?;
    token
        .trim()
        .parse::<i64>()
        .map(|t| t as i32)
        .map_err(|_| ProbeError::Protocol(format!("invalid challenge token {:?}", token)))
}

pub(crate) fn parse_full_stat(packet: &[u8], session_id: i32) -> Result<QueryResult, ProbeError> {
    let mut cursor = Cursor::new(packet);
    read_header(&mut cursor, TYPE_STAT, session_id)?;
    if !skip(&mut cursor, KV_PADDING) {
        return Err(ProbeError::Protocol("truncated full stat".into()));
    }

    let mut values = HashMap::new();
    loop {
        let key = read_cstring(&mut cursor)?;
        if key.is_empty() {
            break;
        }
        let value = read_cstring(&mut cursor)?;
        values.insert(key, value);
    }

    let mut player_list = Vec::new();
    if skip(&mut cursor, PLAYER_PADDING) {
        loop {
            match read_cstring(&mut cursor) {
                Ok(name) if !name.is_empty() => player_list.push(name),
                _ => break,
            }
        }
    }

    let take = |key: &str| values.get(key).cloned().unwrap_or_default();
    let number = |key: &str| values.get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(0);
    let (server_mod, plugins) = split_plugins(&take("plugins"));

    Ok(QueryResult {
        motd: take("hostname"),
        version: take("version"),
        game_type: take("gametype"),
        game_id: take("game_id"),
        map: take("map"),
        server_mod,
        plugins,
        players: Players {
            max: number("maxplayers"),
            now: number("numplayers"),
        },
        player_list,
    })
}

/// `"CraftBukkit on Bukkit 1.20: WorldEdit 7.2; Essentials 2.19"` becomes the
/// server mod and its plugin list.
fn split_plugins(raw: &str) -> (String, Vec<String>) {
    match raw.split_once(": ") {
        Some((server_mod, list)) => (
            server_mod.trim().to_string(),
            list.split("; ")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        None => (raw.trim().to_string(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: i32 = 0x0102_0304;

    fn stat_packet(pairs: &[(&str, &str)], players: &[&str]) -> Vec<u8> {
        let mut packet = vec![TYPE_STAT];
        packet.extend_from_slice(&SESSION.to_be_bytes());
        packet.extend_from_slice(b"splitnum\0\x80\0");
        for (k, v) in pairs {
            packet.extend_from_slice(k.as_bytes());
            packet.push(0);
            packet.extend_from_slice(v.as_bytes());
            packet.push(0);
        }
        packet.push(0);
        packet.extend_from_slice(b"\x01player_\0\0");
        for p in players {
            packet.extend_from_slice(p.as_bytes());
            packet.push(0);
        }
        packet.push(0);
        packet
    }

    #[test]
    fn requests_have_expected_layout() {
        assert_eq!(
            handshake_request(SESSION).unwrap(),
            vec![0xFE, 0xFD, 0x09, 0x01, 0x02, 0x03, 0x04]
        );
        let stat = stat_request(SESSION, 9_513_307).unwrap();
        assert_eq!(stat.len(), 15);
        assert_eq!(&stat[7..11], &9_513_307i32.to_be_bytes());
        assert_eq!(&stat[11..], &[0, 0, 0, 0]);
    }

    #[test]
    fn parses_handshake_token() {
        let mut packet = vec![TYPE_HANDSHAKE];
        packet.extend_from_slice(&SESSION.to_be_bytes());
        packet.extend_from_slice(b"9513307\0");
        assert_eq!(parse_handshake(&packet, SESSION).unwrap(), 9_513_307);
        assert!(parse_handshake(&packet, SESSION + 1).is_err());
    }

    #[test]
    fn parses_full_stat() {
        let packet = stat_packet(
            &[
                ("hostname", "A Minecraft Server"),
                ("gametype", "SMP"),
                ("game_id", "MINECRAFT"),
                ("version", "1.20.4"),
                ("plugins", "Paper on 1.20.4: WorldEdit 7.2; Essentials 2.19"),
                ("map", "world"),
                ("numplayers", "2"),
                ("maxplayers", "20"),
            ],
            &["alice", "bob"],
        );

        let result = parse_full_stat(&packet, SESSION).unwrap();
        assert_eq!(result.motd, "A Minecraft Server");
        assert_eq!(result.game_type, "SMP");
        assert_eq!(result.map, "world");
        assert_eq!(result.server_mod, "Paper on 1.20.4");
        assert_eq!(result.plugins, vec!["WorldEdit 7.2", "Essentials 2.19"]);
        assert_eq!(result.players, Players { max: 20, now: 2 });
        assert_eq!(result.player_list, vec!["alice", "bob"]);
    }

    #[test]
    fn tolerates_missing_player_section() {
        let mut packet = stat_packet(&[("hostname", "x")], &[]);
        packet.truncate(packet.len() - 11);
        let result = parse_full_stat(&packet, SESSION).unwrap();
        assert_eq!(result.motd, "x");
        assert!(result.player_list.is_empty());
    }

    #[test]
    fn rejects_truncated_packets() {
        assert!(parse_full_stat(&[TYPE_STAT, 0x01], SESSION).is_err());
        assert!(parse_full_stat(&[], SESSION).is_err());
    }

    #[test]
    fn vanilla_plugins_field() {
        assert_eq!(split_plugins(""), (String::new(), Vec::<String>::new()));
        assert_eq!(split_plugins("Vanilla"), ("Vanilla".to_string(), Vec::<String>::new()));
    }

    #[tokio::test]
    async fn queries_a_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = server.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let session = i32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]);
            let mut reply = vec![TYPE_HANDSHAKE];
            reply.extend_from_slice(&session.to_be_bytes());
            reply.extend_from_slice(b"42\0");
            server.send_to(&reply, peer).await.unwrap();

            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 15);
            assert_eq!(&buf[7..11], &42i32.to_be_bytes());
            let mut reply = vec![TYPE_STAT];
            reply.extend_from_slice(&session.to_be_bytes());
            reply.extend_from_slice(b"splitnum\0\x80\0hostname\0local\0\0\x01player_\0\0steve\0\0");
            server.send_to(&reply, peer).await.unwrap();
        });

        let result = full_stat(target, Duration::from_secs(2)).await.unwrap();
        assert_eq!(result.motd, "local");
        assert_eq!(result.player_list, vec!["steve"]);
        handle.await.unwrap();
    }
}
