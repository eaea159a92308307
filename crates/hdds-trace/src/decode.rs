// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoder for tshark verbose (`-V`) per-frame text.
//!
//! Each frame's lines are first split into five header sections and a list
//! of submessage groups, then fields are extracted by searching for known
//! labels. Label search tolerates optional and reordered dissector lines;
//! the first occurrence of a label wins.

use crate::fragment::{FragmentKey, FragmentTable};
use crate::frame::{
    AckNackSubmessage, DataSubmessage, EndpointAnnouncement, Frame, FrameStore, GapSubmessage,
    HeartbeatSubmessage, InfoDst, Locator, ParticipantAnnouncement,
};
use crate::guid::{EntityId, Guid, GuidPrefix};
use crate::ingest::RawFrames;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// Parameter values are printed three lines below their parameter header.
const PARAMETER_VALUE_OFFSET: usize = 3;

const RELIABLE_KIND: &str = "RELIABLE_RELIABILITY_QOS";
const ZERO_MAC: &str = "00:00:00:00:00:00";
const MAC_LEN: usize = 17;

/// Frame header sections, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    FrameMeta,
    Link,
    Network,
    Transport,
    RtpsHeader,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FrameMeta => "frame meta",
            Self::Link => "link layer",
            Self::Network => "network layer",
            Self::Transport => "transport layer",
            Self::RtpsHeader => "RTPS header",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{section} section is missing {field}")]
    MissingField {
        section: Section,
        field: &'static str,
    },

    #[error("invalid guidPrefix {0:?}")]
    InvalidGuidPrefix(String),

    /// Not an error in the capture: the datagram continues in later frames.
    #[error("partial IP datagram, more fragments follow")]
    Fragmented,

    #[error("{kind} submessage is missing {field}")]
    Submessage { kind: String, field: &'static str },
}

/// One frame's lines split by protocol layer.
#[derive(Debug, Default, PartialEq)]
pub struct FrameSections<'a> {
    pub meta: Vec<&'a str>,
    pub link: Vec<&'a str>,
    pub network: Vec<&'a str>,
    pub transport: Vec<&'a str>,
    pub rtps: Vec<&'a str>,
    pub submessages: Vec<Vec<&'a str>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    Meta,
    Link,
    Network,
    Transport,
    Rtps,
    Submessages,
}

fn is_link_header(line: &str) -> bool {
    line.starts_with("Ethernet") || line.starts_with("Linux cooked capture")
}

fn is_submessage_header(line: &str) -> bool {
    line.contains("submessageId:")
}

/// Assign each line to a section. Only the header line of the section that
/// immediately follows the current one advances the split.
pub fn split_sections<S: AsRef<str>>(lines: &[S]) -> FrameSections<'_> {
    let mut sections = FrameSections::default();
    let mut stage = Stage::Meta;

    for line in lines {
        let line: &str = line.as_ref();
        stage = match stage {
            Stage::Meta if is_link_header(line) => Stage::Link,
            Stage::Link if line.starts_with("Internet Protocol") => Stage::Network,
            Stage::Network if line.starts_with("User Datagram Protocol") => Stage::Transport,
            Stage::Transport if line.starts_with("Real-Time Publish-Subscribe Wire Protocol") => {
                Stage::Rtps
            }
            Stage::Rtps if is_submessage_header(line) => Stage::Submessages,
            other => other,
        };

        match stage {
            Stage::Meta => sections.meta.push(line),
            Stage::Link => sections.link.push(line),
            Stage::Network => sections.network.push(line),
            Stage::Transport => sections.transport.push(line),
            Stage::Rtps => sections.rtps.push(line),
            Stage::Submessages => {
                if is_submessage_header(line) {
                    sections.submessages.push(vec![line]);
                } else if let Some(group) = sections.submessages.last_mut() {
                    group.push(line);
                }
            }
        }
    }

    sections
}

// ----------------------------------------------------------------------------
// Label scanning
// ----------------------------------------------------------------------------

fn after<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.find(label).map(|pos| &line[pos + label.len()..])
}

/// Remainder of the first line containing `label`.
fn value<'a>(lines: &[&'a str], label: &str) -> Option<&'a str> {
    lines.iter().find_map(|&line| after(line, label))
}

fn value_any<'a>(lines: &[&'a str], labels: &[&str]) -> Option<&'a str> {
    labels.iter().find_map(|label| value(lines, label))
}

fn first_token(s: &str) -> Option<&str> {
    s.split_whitespace().next()
}

/// Leading decimal digits, ignoring any trailing decoration.
fn parse_leading<T: FromStr>(s: &str) -> Option<T> {
    let s = s.trim_start();
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

fn parse_float(s: &str) -> Option<f64> {
    first_token(s)?.parse().ok()
}

/// Leading hex digits with optional `0x` prefix.
fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim_start();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let end = s
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(s.len());
    u32::from_str_radix(&s[..end], 16).ok()
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Values printed [`PARAMETER_VALUE_OFFSET`] lines below each `marker`.
fn parameter_values<'a>(lines: &[&'a str], marker: &str, label: &str) -> Vec<&'a str> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(marker))
        .filter_map(|(i, _)| lines.get(i + PARAMETER_VALUE_OFFSET))
        .filter_map(|&line| after(line, label))
        .collect()
}

// ----------------------------------------------------------------------------
// Header sections
// ----------------------------------------------------------------------------

struct Meta {
    frame_no: u64,
    epoch_time: f64,
    reference_time: f64,
}

fn missing(section: Section, field: &'static str) -> DecodeError {
    DecodeError::MissingField { section, field }
}

fn decode_meta(lines: &[&str]) -> Result<Meta, DecodeError> {
    let frame_no = value(lines, "Frame Number: ")
        .and_then(parse_leading::<u64>)
        .filter(|n| *n != 0)
        .ok_or_else(|| missing(Section::FrameMeta, "Frame Number"))?;
    let epoch_time = value_any(lines, &["Epoch Time: ", "Epoch Arrival Time: "])
        .and_then(parse_float)
        .filter(|t| *t >= 0.0)
        .ok_or_else(|| missing(Section::FrameMeta, "Epoch Time"))?;
    let reference_time = value(lines, "[Time since reference or first frame: ")
        .and_then(parse_float)
        .unwrap_or(0.0);

    Ok(Meta {
        frame_no,
        epoch_time,
        reference_time,
    })
}

/// MAC from `Name (aa:bb:cc:dd:ee:ff)` or a bare address.
fn mac_address(s: &str) -> &str {
    match s.find(" (") {
        Some(pos) => {
            let rest = &s[pos + 2..];
            rest.get(..MAC_LEN).unwrap_or(rest)
        }
        None => s.trim(),
    }
}

fn decode_link(lines: &[&str]) -> Result<(Option<String>, Option<String>), DecodeError> {
    let cooked = lines
        .first()
        .is_some_and(|l| l.starts_with("Linux cooked capture"));

    let src_mac = value(lines, "Source: ")
        .map(mac_address)
        .filter(|mac| *mac != ZERO_MAC)
        .and_then(non_empty);
    if cooked {
        return Ok((src_mac.clone(), src_mac));
    }

    let dst_mac = value(lines, "Destination: ")
        .map(mac_address)
        .and_then(non_empty);
    match (src_mac, dst_mac) {
        (Some(src), Some(dst)) => Ok((Some(src), Some(dst))),
        (None, _) => Err(missing(Section::Link, "Source")),
        (_, None) => Err(missing(Section::Link, "Destination")),
    }
}

/// Returns (src ip, dst ip). Partial datagrams are recorded in `fragments`
/// and rejected with [`DecodeError::Fragmented`].
fn decode_network(
    lines: &[&str],
    meta: &Meta,
    fragments: &mut FragmentTable,
) -> Result<(String, String), DecodeError> {
    let src_ip = value_any(lines, &["Source: ", "Source Address: "]).and_then(non_empty);
    let dst_ip = value_any(lines, &["Destination: ", "Destination Address: "]).and_then(non_empty);
    let more_fragments = lines.iter().any(|l| l.contains("More fragments: Set"));
    let offset = value_any(lines, &["Fragment offset: ", "Fragment Offset: "])
        .and_then(parse_leading::<u64>)
        .unwrap_or(0);
    let identification = value(lines, "Identification: ").unwrap_or("").trim();

    let key = || {
        FragmentKey::new(
            identification,
            src_ip.as_deref().unwrap_or(""),
            dst_ip.as_deref().unwrap_or(""),
        )
    };

    if more_fragments {
        if offset == 0 {
            fragments.record_first(key(), meta.frame_no, meta.reference_time);
        }
        return Err(DecodeError::Fragmented);
    }

    let src_ip = src_ip
        .clone()
        .ok_or_else(|| missing(Section::Network, "Source"))?;
    let dst_ip = dst_ip
        .clone()
        .ok_or_else(|| missing(Section::Network, "Destination"))?;

    if offset != 0 {
        if let Err(collision) = fragments.record_completion(&key(), meta.frame_no) {
            warn!("{}", collision);
        }
    }

    Ok((src_ip, dst_ip))
}

fn decode_transport(lines: &[&str]) -> Result<(String, String, u64), DecodeError> {
    let src_port = value(lines, "Source Port: ")
        .and_then(first_token)
        .map(str::to_string)
        .ok_or_else(|| missing(Section::Transport, "Source Port"))?;
    let dst_port = value(lines, "Destination Port: ")
        .and_then(first_token)
        .map(str::to_string)
        .ok_or_else(|| missing(Section::Transport, "Destination Port"))?;
    let udp_length = value(lines, "Length: ")
        .and_then(parse_leading::<u64>)
        .unwrap_or(0);
    Ok((src_port, dst_port, udp_length))
}

fn parse_prefix(text: &str) -> Result<GuidPrefix, DecodeError> {
    let token = first_token(text).unwrap_or("");
    token
        .parse()
        .map_err(|_| DecodeError::InvalidGuidPrefix(token.to_string()))
}

fn decode_rtps_header(lines: &[&str]) -> Result<(GuidPrefix, u16), DecodeError> {
    let prefix = value(lines, "guidPrefix: ")
        .ok_or_else(|| missing(Section::RtpsHeader, "guidPrefix"))
        .and_then(parse_prefix)?;
    let domain_id = value(lines, "domain_id: ")
        .and_then(parse_leading::<u16>)
        .ok_or_else(|| missing(Section::RtpsHeader, "domain_id"))?;
    Ok((prefix, domain_id))
}

// ----------------------------------------------------------------------------
// Submessages
// ----------------------------------------------------------------------------

/// Submessage kind: the word after `submessageId: `.
pub fn submessage_kind(header: &str) -> Option<&str> {
    after(header, "submessageId: ").and_then(first_token)
}

fn submessage_error(kind: &str, field: &'static str) -> DecodeError {
    DecodeError::Submessage {
        kind: kind.to_string(),
        field,
    }
}

/// Flags are printed on the second line of the group.
fn submessage_flags(kind: &str, lines: &[&str]) -> Result<u16, DecodeError> {
    lines
        .get(1)
        .and_then(|line| after(line, "Flags: "))
        .and_then(parse_hex)
        .and_then(|flags| u16::try_from(flags).ok())
        .ok_or_else(|| submessage_error(kind, "Flags"))
}

/// Entity id in either `0x000003c2 (NAME)` or `NAME (0x000003c2)` form.
fn entity_id(lines: &[&str], label: &str) -> Option<EntityId> {
    let rest = value(lines, label)?;
    let hex = match rest.strip_prefix("0x") {
        Some(hex) => hex,
        None => {
            let pos = rest.find("(0x")?;
            &rest[pos + 3..]
        }
    };
    hex.get(..8)?.parse().ok()
}

struct EndpointHeader {
    flags: u16,
    writer_id: EntityId,
    reader_id: EntityId,
}

fn endpoint_header(kind: &str, lines: &[&str]) -> Result<EndpointHeader, DecodeError> {
    let flags = submessage_flags(kind, lines)?;
    let reader_id =
        entity_id(lines, "readerEntityId: ").ok_or_else(|| submessage_error(kind, "readerEntityId"))?;
    let writer_id =
        entity_id(lines, "writerEntityId: ").ok_or_else(|| submessage_error(kind, "writerEntityId"))?;
    Ok(EndpointHeader {
        flags,
        writer_id,
        reader_id,
    })
}

fn seq_num(lines: &[&str], label: &str) -> u64 {
    value(lines, label)
        .and_then(parse_leading::<u64>)
        .unwrap_or(0)
}

fn bitmap(lines: &[&str]) -> String {
    value(lines, "bitmap: ").unwrap_or("").trim().to_string()
}

/// Four whitespace-separated quartets forming a GUID. Anything that does
/// not add up to exactly 32 hex characters is discarded.
fn quartet_guid(lines: &[&str], label: &str) -> Option<Guid> {
    let joined: String = value(lines, label)?.split_whitespace().take(4).collect();
    joined.parse().ok()
}

/// `(LOCATOR_KIND_UDPV4, 10.0.0.1:7411)` tail of a locator parameter.
fn parse_locator(rest: &str) -> Option<Locator> {
    let addr = rest.split_whitespace().nth(1)?;
    let addr = addr.find(')').map_or(addr, |end| &addr[..end]);
    let (ip, port) = addr.rsplit_once(':')?;
    Some(Locator {
        ip: ip.to_string(),
        port: port.to_string(),
    })
}

fn locators(lines: &[&str], marker: &str) -> Vec<Locator> {
    lines
        .iter()
        .filter_map(|&line| after(line, marker))
        .filter_map(parse_locator)
        .collect()
}

fn decode_participant(lines: &[&str]) -> Option<ParticipantAnnouncement> {
    let guid = quartet_guid(lines, "Participant GUID: ")?;
    let builtin_endpoints = parameter_values(lines, "  PID_BUILTIN_ENDPOINT_SET", "Flags: ")
        .first()
        .and_then(|v| parse_hex(v))
        .unwrap_or(0);
    Some(ParticipantAnnouncement {
        guid,
        metatraffic_unicast: locators(lines, "  PID_METATRAFFIC_UNICAST_LOCATOR ("),
        metatraffic_multicast: locators(lines, "  PID_METATRAFFIC_MULTICAST_LOCATOR ("),
        builtin_endpoints,
    })
}

fn decode_endpoint(lines: &[&str]) -> Option<EndpointAnnouncement> {
    let guid = quartet_guid(lines, "Endpoint GUID: ")?;
    let registered_writers = parameter_values(lines, "  Unknown (0xb002)", "parameterData: ")
        .into_iter()
        .filter_map(|v| {
            let parsed: Option<Guid> = first_token(v).and_then(|t| t.parse().ok());
            if parsed.is_none() {
                debug!("Ignoring malformed registered writer {:?}", v);
            }
            parsed
        })
        .collect();
    let reliable = parameter_values(lines, "  PID_RELIABILITY", "Kind: ")
        .first()
        .is_some_and(|kind| kind.trim_start().starts_with(RELIABLE_KIND));
    Some(EndpointAnnouncement {
        guid,
        unicast: locators(lines, "  PID_UNICAST_LOCATOR ("),
        multicast: locators(lines, "  PID_MULTICAST_LOCATOR ("),
        registered_writers,
        reliable,
    })
}

/// Decode one submessage group into `frame`. Kinds that carry nothing the
/// analysis needs are accepted and skipped.
fn decode_submessage(lines: &[&str], sm_order: usize, frame: &mut Frame) -> Result<(), DecodeError> {
    let Some(kind) = lines.first().copied().and_then(submessage_kind) else {
        return Err(submessage_error("unknown", "submessageId"));
    };

    match kind {
        "INFO_DST" => {
            let flags = submessage_flags(kind, lines)?;
            let guid_prefix = value(lines, "guidPrefix: ")
                .ok_or_else(|| submessage_error(kind, "guidPrefix"))
                .and_then(parse_prefix)?;
            frame.info_dsts.push(InfoDst {
                sm_order,
                flags,
                guid_prefix,
            });
        }
        "DATA" => {
            let header = endpoint_header(kind, lines)?;
            frame.datas.push(DataSubmessage {
                sm_order,
                flags: header.flags,
                writer_id: header.writer_id,
                reader_id: header.reader_id,
                writer_seq_num: seq_num(lines, "writerSeqNumber: "),
                unregistered: lines.iter().any(|l| l.contains(" = Unregistered: Set")),
                disposed: lines.iter().any(|l| l.contains(" = Disposed: Set")),
                participant: decode_participant(lines),
                endpoint: decode_endpoint(lines),
            });
        }
        "GAP" => {
            let header = endpoint_header(kind, lines)?;
            frame.gaps.push(GapSubmessage {
                sm_order,
                flags: header.flags,
                writer_id: header.writer_id,
                reader_id: header.reader_id,
                gap_start: seq_num(lines, "gapStart: "),
                bitmap_base: seq_num(lines, "bitmapBase: "),
                bitmap: bitmap(lines),
            });
        }
        "HEARTBEAT" => {
            let header = endpoint_header(kind, lines)?;
            frame.heartbeats.push(HeartbeatSubmessage {
                sm_order,
                flags: header.flags,
                writer_id: header.writer_id,
                reader_id: header.reader_id,
                first_seq_num: seq_num(lines, "firstAvailableSeqNumber: "),
                last_seq_num: seq_num(lines, "lastSeqNumber: "),
            });
        }
        "ACKNACK" => {
            let header = endpoint_header(kind, lines)?;
            frame.acknacks.push(AckNackSubmessage {
                sm_order,
                flags: header.flags,
                writer_id: header.writer_id,
                reader_id: header.reader_id,
                bitmap_base: seq_num(lines, "bitmapBase: "),
                bitmap: bitmap(lines),
            });
        }
        _ => {}
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Frames
// ----------------------------------------------------------------------------

/// Decode one frame's lines.
///
/// A missing mandatory header field rejects the whole frame. A malformed
/// submessage is logged and dropped; it still occupies its position so
/// INFO_DST scoping of later submessages is unaffected.
pub fn decode_frame<S: AsRef<str>>(
    lines: &[S],
    fragments: &mut FragmentTable,
) -> Result<Frame, DecodeError> {
    let sections = split_sections(lines);

    let meta = decode_meta(&sections.meta)?;
    let (src_mac, dst_mac) = decode_link(&sections.link)?;
    let (src_ip, dst_ip) = decode_network(&sections.network, &meta, fragments)?;
    let (src_port, dst_port, udp_length) = decode_transport(&sections.transport)?;
    let (guid_prefix, domain_id) = decode_rtps_header(&sections.rtps)?;

    let mut frame = Frame {
        frame_no: meta.frame_no,
        epoch_time: meta.epoch_time,
        reference_time: meta.reference_time,
        src_mac,
        dst_mac,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        udp_length,
        domain_id,
        guid_prefix,
        info_dsts: Vec::new(),
        datas: Vec::new(),
        gaps: Vec::new(),
        heartbeats: Vec::new(),
        acknacks: Vec::new(),
    };

    for (sm_order, group) in sections.submessages.iter().enumerate() {
        if let Err(err) = decode_submessage(group, sm_order, &mut frame) {
            warn!(
                "Frame {}: dropping submessage {}: {}",
                frame.frame_no, sm_order, err
            );
        }
    }

    Ok(frame)
}

/// Decode every grouped frame into a [`FrameStore`].
pub fn decode_frames(raw: &RawFrames) -> FrameStore {
    let mut store = FrameStore::new();

    for (frame_no, lines) in raw {
        match decode_frame(lines, &mut store.fragments) {
            Ok(frame) => store.insert(frame),
            Err(DecodeError::Fragmented) => {
                debug!("Frame {}: partial IP datagram", frame_no);
            }
            Err(err) => warn!("Dropping frame {}: {}", frame_no, err),
        }
    }

    debug!(
        "Decoded {} of {} frames ({} fragmented datagrams)",
        store.len(),
        raw.len(),
        store.fragments.len()
    );
    store
}
