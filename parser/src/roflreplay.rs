use nom::number::complete::le_u32;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;
use tracing::{debug, warn};

use crate::analyzer::Analyzer;
use crate::block::BlockDecoder;
use crate::chunk::{Chunk, ChunkDecoder};
use crate::config::DecoderConfig;
use crate::error::{Error, ErrorKind};
use crate::types::{Role, Team};

const VERSION_OFFSET: usize = 0x10;
const VERSION_END: usize = 0x50;
/// Byte that decides between the short and long header layouts.
const HEADER_DISCRIMINATOR_OFFSET: usize = 0x1C;
const SHORT_HEADER_LEN: usize = 0x1C;
const LONG_HEADER_LEN: usize = 0x1D;
const SIGNATURE_LEN: usize = 0x100;
const META_LEN_FIELD: usize = 4;

/// Metadata JSON exactly as it appears at the end of the file.
#[allow(non_snake_case)]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayMeta {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub gameLength: u64,
    #[serde(default)]
    pub gameVersion: Option<String>,
    #[serde(default)]
    pub lastGameChunkId: Option<u32>,
    #[serde(default)]
    pub lastKeyFrameId: Option<u32>,
    #[serde(default)]
    pub statsJson: String,
}

/// Accepts integers, floats and numeric strings; anything else reads as 0.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().map_or(0, |f| f.max(0.0) as u64),
        _ => 0,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Player {
    pub name: String,
    pub skin: String,
    pub team: Team,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub version: String,
    /// Game length in milliseconds.
    pub game_length: u64,
    pub winning_team: Option<Team>,
    pub players: Vec<Player>,
    pub game_version: Option<String>,
    pub last_game_chunk_id: Option<u32>,
    pub last_key_frame_id: Option<u32>,
    /// The complete metadata document, for keys this crate does not model.
    pub raw: serde_json::Value,
}

impl Metadata {
    pub fn game_length_secs(&self) -> f64 {
        self.game_length as f64 / 1000.0
    }

    pub fn team(&self, team: Team) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(move |p| p.team == team)
    }
}

pub struct ReplayFile {
    pub meta: Metadata,
    pub event_data: Vec<u8>,
}

impl ReplayFile {
    pub fn from_file(replay: &std::path::Path) -> Result<ReplayFile, ErrorKind> {
        let mut f = std::fs::File::open(replay)?;
        let mut contents = vec![];
        f.read_to_end(&mut contents)?;
        Self::from_bytes(&contents)
    }

    pub fn from_bytes(contents: &[u8]) -> Result<ReplayFile, ErrorKind> {
        let (meta, event_data) = parse_replay(contents)?;
        Ok(ReplayFile {
            meta,
            event_data: event_data.to_vec(),
        })
    }

    /// Lazily decodes the chunk records of the event region.
    pub fn chunks<'a>(&'a self, config: &DecoderConfig) -> ChunkDecoder<'a> {
        ChunkDecoder::new(&self.event_data, config.decompression)
    }

    pub fn decode_chunks(&self, config: &DecoderConfig) -> Vec<Chunk> {
        self.chunks(config).collect()
    }

    pub fn keyframes(&self, config: &DecoderConfig) -> impl Iterator<Item = Chunk> + '_ {
        self.chunks(config).filter(|c| c.kind.is_keyframe())
    }

    pub fn game_chunks(&self, config: &DecoderConfig) -> impl Iterator<Item = Chunk> + '_ {
        self.chunks(config).filter(|c| c.kind.is_chunk())
    }

    /// Runs every block of every chunk with a payload through `analyzer`.
    pub fn for_each_block(&self, config: &DecoderConfig, analyzer: &mut dyn Analyzer) {
        for chunk in self.chunks(config) {
            let Some(payload) = chunk.payload.as_deref() else {
                continue;
            };
            analyzer.begin_chunk(&chunk);
            for block in BlockDecoder::new(payload) {
                analyzer.process(&block);
            }
        }
        analyzer.finish();
    }
}

/// Splits a whole replay file into its metadata and event region.
pub fn parse_replay(i: &[u8]) -> Result<(Metadata, &[u8]), ErrorKind> {
    if i.len() < META_LEN_FIELD {
        return Err(ErrorKind::format("file too short for metadata length"));
    }
    let trailer_start = i.len() - META_LEN_FIELD;
    let (_, meta_len) = le_u32::<_, Error<_>>(&i[trailer_start..])?;
    let meta_len = meta_len as usize;

    let meta_start = trailer_start
        .checked_sub(meta_len)
        .ok_or_else(|| ErrorKind::format(format!("metadata length {meta_len} exceeds file size")))?;
    let meta_bytes = &i[meta_start..trailer_start];

    let events_end = meta_start
        .checked_sub(SIGNATURE_LEN)
        .ok_or_else(|| ErrorKind::format("file too short for signature block"))?;

    let discriminator = *i
        .get(HEADER_DISCRIMINATOR_OFFSET)
        .ok_or_else(|| ErrorKind::format("file too short for header"))?;
    let header_len = if discriminator == 1 {
        SHORT_HEADER_LEN
    } else {
        LONG_HEADER_LEN
    };
    if header_len > events_end {
        return Err(ErrorKind::format(format!(
            "header ({header_len} bytes) overlaps signature block at {events_end:#x}"
        )));
    }

    let version = parse_version(i);
    let meta = parse_meta(version, meta_bytes)?;
    debug!(
        version = %meta.version,
        players = meta.players.len(),
        event_bytes = events_end - header_len,
        "parsed replay container"
    );

    Ok((meta, &i[header_len..events_end]))
}

fn parse_version(i: &[u8]) -> String {
    let end = VERSION_END.min(i.len());
    let region = i.get(VERSION_OFFSET..end).unwrap_or_default();
    let region = match region.iter().position(|&b| b == 0) {
        Some(nul) => &region[..nul],
        None => region,
    };
    String::from_utf8_lossy(region).into_owned()
}

fn parse_meta_json(meta_bytes: &[u8]) -> Result<serde_json::Value, ErrorKind> {
    let text = String::from_utf8_lossy(meta_bytes);
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(strict) => {
            // Some files carry padding around the document.
            let start = text.find('{');
            let end = text.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    warn!("metadata is not strict JSON ({strict}), retrying on the outer object");
                    serde_json::from_str(&text[start..=end]).map_err(|e| {
                        ErrorKind::format(format!("unparseable metadata json: {e}"))
                    })
                }
                _ => Err(ErrorKind::format(format!("unparseable metadata json: {strict}"))),
            }
        }
    }
}

fn parse_meta(version: String, meta_bytes: &[u8]) -> Result<Metadata, ErrorKind> {
    let raw = parse_meta_json(meta_bytes)?;
    let replay_meta: ReplayMeta = serde_json::from_value(raw.clone())
        .map_err(|e| ErrorKind::format(format!("unexpected metadata shape: {e}")))?;

    let stats: Vec<serde_json::Map<String, serde_json::Value>> =
        if replay_meta.statsJson.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&replay_meta.statsJson)
                .map_err(|e| ErrorKind::format(format!("unparseable statsJson: {e}")))?
        };

    let players = stats
        .iter()
        .enumerate()
        .map(|(idx, entry)| Player {
            name: stat_str(entry, "NAME").unwrap_or("Unknown").to_string(),
            skin: stat_str(entry, "SKIN").unwrap_or("Unknown").to_string(),
            team: Team::from_code(stat_str(entry, "TEAM").unwrap_or(Team::BLUE_CODE)),
            role: Role::from_slot(idx),
        })
        .collect();

    let winning_team = stats.first().map(|first| {
        let team = Team::from_code(stat_str(first, "TEAM").unwrap_or(Team::BLUE_CODE));
        if stat_str(first, "WIN") == Some("Win") {
            team
        } else {
            team.opponent()
        }
    });

    Ok(Metadata {
        version,
        game_length: replay_meta.gameLength,
        winning_team,
        players,
        game_version: replay_meta.gameVersion,
        last_game_chunk_id: replay_meta.lastGameChunkId,
        last_key_frame_id: replay_meta.lastKeyFrameId,
        raw,
    })
}

fn stat_str<'a>(entry: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(|v| v.as_str())
}
