//! AniDB adapter (C8) — UDP text protocol for session auth, ED2K+size
//! episode lookup, and HTTP API for anime info by AID (spec §4.4, §5). ED2K
//! hashing is expensive and is only performed when AniDB is the user's
//! first-choice provider or explicitly forced (spec §4.4, §7 "Force-hash").
//! Every call is wrapped in the caller's 60s hard timeout (spec §5, §7).

use crate::clients::rate_limiter::HostPacer;
use crate::models::provider::AniDbRaw;
use anyhow::{Context, Result, anyhow};
use md4::{Digest, Md4};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

pub(crate) const ANIDB_UDP_HOST: &str = "api.anidb.net:9000";
pub(crate) const ANIDB_HTTP_HOST: &str = "anidb.net";
const ANIDB_HTTP_API: &str = "http://api.anidb.net:9001/httpapi";
/// ED2K chunk size (9,728,000 bytes, the eMule/ED2K "block" length).
const ED2K_CHUNK_SIZE: usize = 9_728_000;
const MIN_SPACING_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct EpisodeHit {
    pub title: String,
    pub raw: AniDbRaw,
}

#[derive(Debug, Clone, Default)]
pub struct Ed2kHash {
    pub hash: String,
    pub size: u64,
}

struct Session {
    key: String,
    addr: SocketAddr,
}

pub struct AniDbClient {
    pacer: Arc<HostPacer>,
    username: String,
    password: String,
    client_name: String,
    client_version: String,
    session: Mutex<Option<Session>>,
    http: reqwest::Client,
}

impl AniDbClient {
    #[must_use]
    pub fn new(pacer: Arc<HostPacer>, username: String, password: String, client_name: String, client_version: String) -> Self {
        pacer.set_min_spacing(ANIDB_HTTP_HOST, Duration::from_millis(MIN_SPACING_MS));
        Self {
            pacer,
            username,
            password,
            client_name,
            client_version,
            session: Mutex::new(None),
            http: reqwest::Client::builder()
                .user_agent("renamarr/1.0")
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Computes the ED2K hash of a file — a MD4 digest of 9,728,000-byte
    /// chunks, concatenated and MD4'd again when the file spans more than
    /// one chunk (spec §4.4 "AniDB episode lookup by ED2K + size").
    pub async fn hash_file(path: &Path) -> Result<Ed2kHash> {
        let mut file = File::open(path).await.context("opening file for ed2k hashing")?;
        let mut chunk_digests: Vec<[u8; 16]> = Vec::new();
        let mut buf = vec![0_u8; ED2K_CHUNK_SIZE];
        let mut total: u64 = 0;

        loop {
            let mut filled = 0;
            loop {
                let read = file.read(&mut buf[filled..]).await.context("reading file chunk")?;
                if read == 0 {
                    break;
                }
                filled += read;
                if filled == buf.len() {
                    break;
                }
            }
            if filled == 0 {
                break;
            }
            total += filled as u64;
            let mut hasher = Md4::new();
            hasher.update(&buf[..filled]);
            chunk_digests.push(hasher.finalize().into());
            if filled < buf.len() {
                break;
            }
        }

        let hash = if chunk_digests.len() <= 1 {
            chunk_digests.first().map(hex_encode).unwrap_or_default()
        } else {
            let mut combined = Md4::new();
            for digest in &chunk_digests {
                combined.update(digest);
            }
            hex_encode(&combined.finalize().into())
        };

        Ok(Ed2kHash { hash, size: total })
    }

    async fn ensure_session(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        self.pacer.wait(ANIDB_HTTP_HOST).await;

        let socket = UdpSocket::bind("0.0.0.0:0").await.context("binding anidb udp socket")?;
        socket.connect(ANIDB_UDP_HOST).await.context("connecting anidb udp socket")?;
        let addr = socket.peer_addr().context("anidb udp peer addr")?;

        let command = format!(
            "AUTH user={}&pass={}&protover=3&client={}&clientver={}&enc=UTF8",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password),
            self.client_name,
            self.client_version,
        );
        socket.send(command.as_bytes()).await.context("sending anidb AUTH")?;

        let mut response_buf = vec![0_u8; 1400];
        let n = socket.recv(&mut response_buf).await.context("receiving anidb AUTH response")?;
        let response = String::from_utf8_lossy(&response_buf[..n]).to_string();

        if !response.starts_with("200") && !response.starts_with("201") {
            return Err(anyhow!("anidb auth rejected: {response}"));
        }
        let key = response
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow!("anidb auth response missing session key"))?
            .to_string();

        *guard = Some(Session { key, addr });
        Ok(())
    }

    async fn send_command(&self, command: &str) -> Result<String> {
        self.ensure_session().await?;
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or_else(|| anyhow!("anidb session not established"))?;

        self.pacer.wait(ANIDB_HTTP_HOST).await;
        let socket = UdpSocket::bind("0.0.0.0:0").await.context("binding anidb udp socket")?;
        socket.connect(session.addr).await.context("connecting anidb udp socket")?;

        let full_command = format!("{command}&s={}", session.key);
        socket.send(full_command.as_bytes()).await.context("sending anidb command")?;

        let mut buf = vec![0_u8; 4096];
        let n = socket.recv(&mut buf).await.context("receiving anidb response")?;
        Ok(String::from_utf8_lossy(&buf[..n]).to_string())
    }

    /// Looks up an episode by ED2K hash + file size (spec §4.4 "AniDB UDP
    /// episode lookup by ED2K + size").
    pub async fn fetch_episode_by_hash(&self, ed2k: &Ed2kHash) -> Result<Option<EpisodeHit>> {
        let command = format!("FILE size={}&ed2k={}&fmask=7000000000&amask=00008000", ed2k.size, ed2k.hash);
        let response = self.send_command(&command).await?;

        if response.starts_with("320") {
            return Ok(None);
        }
        if !response.starts_with("220") {
            return Err(anyhow!("anidb FILE lookup failed: {response}"));
        }

        let mut lines = response.lines();
        lines.next();
        let Some(data_line) = lines.next() else {
            return Ok(None);
        };
        let fields: Vec<&str> = data_line.split('|').collect();
        let aid: i32 = fields.first().and_then(|f| f.parse().ok()).unwrap_or_default();
        let eid: Option<i32> = fields.get(1).and_then(|f| f.parse().ok());
        let episode_name = fields.get(2).map(|s| (*s).to_string()).unwrap_or_default();
        let raw_episode_code = fields.get(3).map(|s| (*s).to_string());

        if episode_name.is_empty() {
            return Ok(None);
        }

        Ok(Some(EpisodeHit {
            title: episode_name,
            raw: AniDbRaw { aid, eid, raw_episode_code },
        }))
    }

    /// Looks up an episode directly by its AniDB episode id — used when a
    /// manual override supplies `anidbEpisode` so the expensive ED2K hash
    /// lookup can be skipped (spec §9 `PathManualIds`).
    pub async fn fetch_episode_by_id(&self, eid: i32) -> Result<Option<EpisodeHit>> {
        let command = format!("EPISODE eid={eid}");
        let response = self.send_command(&command).await?;

        if response.starts_with("340") {
            return Ok(None);
        }
        if !response.starts_with("240") {
            return Err(anyhow!("anidb EPISODE lookup failed: {response}"));
        }

        let mut lines = response.lines();
        lines.next();
        let Some(data_line) = lines.next() else {
            return Ok(None);
        };
        let fields: Vec<&str> = data_line.split('|').collect();
        let aid: i32 = fields.first().and_then(|f| f.parse().ok()).unwrap_or_default();
        let episode_name = fields.get(4).map(|s| (*s).to_string()).unwrap_or_default();
        let raw_episode_code = fields.get(2).map(|s| (*s).to_string());

        if episode_name.is_empty() {
            return Ok(None);
        }

        Ok(Some(EpisodeHit {
            title: episode_name,
            raw: AniDbRaw { aid, eid: Some(eid), raw_episode_code },
        }))
    }

    /// Resolves an AID by series title via the HTTP anime-info API.
    pub async fn find_anime_id(&self, title: &str) -> Result<Option<i32>> {
        self.pacer.wait(ANIDB_HTTP_HOST).await;
        let url = format!(
            "{ANIDB_HTTP_API}?request=anime&client={}&clientver={}&protover=1&aname={}",
            self.client_name,
            self.client_version,
            urlencoding::encode(title)
        );
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .context("anidb http anime request failed")?
            .text()
            .await
            .context("anidb http anime response read failed")?;

        Ok(extract_xml_attr(&body, "anime", "id").and_then(|s| s.parse().ok()))
    }

    /// Composes the artwork CDN URL for a known AID (spec §7 image worker).
    pub async fn fetch_picture_url(&self, aid: i32) -> Result<Option<String>> {
        self.pacer.wait(ANIDB_HTTP_HOST).await;
        let url = format!(
            "{ANIDB_HTTP_API}?request=anime&client={}&clientver={}&protover=1&aid={aid}",
            self.client_name, self.client_version,
        );
        let body = self
            .http
            .get(&url)
            .send()
            .await
            .context("anidb http anime-by-id request failed")?
            .text()
            .await
            .context("anidb http anime-by-id response read failed")?;

        let picture = extract_xml_text(&body, "picture");
        Ok(picture.map(|filename| format!("https://cdn.anidb.net/images/main/{filename}")))
    }
}

fn hex_encode(bytes: &[u8; 16]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn extract_xml_attr(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let open = format!("<{tag} ");
    let start = xml.find(&open)?;
    let tag_end = xml[start..].find('>')? + start;
    let tag_text = &xml[start..tag_end];
    let attr_marker = format!("{attr}=\"");
    let attr_start = tag_text.find(&attr_marker)? + attr_marker.len();
    let attr_end = tag_text[attr_start..].find('"')? + attr_start;
    Some(tag_text[attr_start..attr_end].to_string())
}

fn extract_xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_xml_attribute() {
        let xml = r#"<animetitles><anime id="42" restricted="false"><title>Frieren</title></anime></animetitles>"#;
        assert_eq!(extract_xml_attr(xml, "anime", "id"), Some("42".to_string()));
    }

    #[test]
    fn extracts_xml_text() {
        let xml = "<anime><picture>12345.jpg</picture></anime>";
        assert_eq!(extract_xml_text(xml, "picture"), Some("12345.jpg".to_string()));
    }

    #[test]
    fn hex_encode_formats_lowercase() {
        let bytes: [u8; 16] = [0xAB; 16];
        assert_eq!(hex_encode(&bytes), "ab".repeat(16));
    }
}
