//! Tagged text codec.
//!
//! Every frame is UTF-8 text of the form `<tag>` or `<tag>/<payload>`. Structured
//! payloads are JSON. There is no checksum, sequence number, or encryption:
//! ordering and delivery are whatever the datagram transport gives us.
//!
//! Two tags are shared by two payload shapes and are told apart by JSON shape:
//! `data` carries either a participant's [`StateUpdate`] or a host [`Snapshot`],
//! and `vote` carries either a [`Ballot`] or a [`VerdictNotice`].

use crate::error::ProtocolError;
use crate::{Identity, ParticipantRecord, StateUpdate, MAX_NAME_LEN};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const TAG_NAME: &str = "name";
pub const TAG_HANDSHAKE: &str = "sys.handshake";
pub const TAG_ACK: &str = "sys.ack";
pub const TAG_PING: &str = "sys.ping";
pub const TAG_PONG: &str = "sys.pong";
pub const TAG_DATA: &str = "data";
pub const TAG_KILL: &str = "kill";
pub const TAG_REPORT: &str = "report";
pub const TAG_VOTE: &str = "vote";
pub const TAG_LIST: &str = "list";
pub const TAG_LIST_REPLY: &str = "list-reply";
pub const TAG_RELAY: &str = "relay";

const SKIP: &str = "skip";

/// What a ballot is cast against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum BallotTarget {
    Skip,
    Participant(Identity),
}

impl fmt::Display for BallotTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BallotTarget::Skip => f.write_str(SKIP),
            BallotTarget::Participant(identity) => write!(f, "{}", identity),
        }
    }
}

impl FromStr for BallotTarget {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case(SKIP) {
            Ok(BallotTarget::Skip)
        } else {
            s.parse().map(BallotTarget::Participant)
        }
    }
}

impl From<BallotTarget> for String {
    fn from(target: BallotTarget) -> Self {
        target.to_string()
    }
}

impl TryFrom<String> for BallotTarget {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One participant's vote in one meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub meeting_id: u64,
    pub voter: Identity,
    pub target: BallotTarget,
}

/// Resolved outcome of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    NoEjection,
    Ejected(Identity),
}

/// Verdict plus the full tally, broadcast by the host once a meeting resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictNotice {
    pub meeting_id: u64,
    pub verdict: Verdict,
    pub tally: BTreeMap<BallotTarget, u32>,
}

/// Full point-in-time copy of every participant, the host included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub host: Identity,
    pub participants: BTreeMap<Identity, ParticipantRecord>,
}

impl Snapshot {
    fn is_finite(&self) -> bool {
        self.participants
            .values()
            .all(|record| record.x.is_finite() && record.y.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KillNotice {
    pub victim: Identity,
    pub x: f32,
    pub y: f32,
    pub character: u8,
    pub timestamp: u64,
}

/// A body report or, without a victim, an emergency call.
///
/// Peers send it without a meeting id; the host echoes it to everyone with the
/// id of the meeting it opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyReport {
    pub reporter: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub victim: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Name(String),
    Handshake,
    /// Session confirmation, optionally carrying the peer's identity as seen by the host.
    Ack(Option<Identity>),
    Ping,
    Pong,
    Update(StateUpdate),
    Snapshot(Snapshot),
    Kill(KillNotice),
    Report(BodyReport),
    Ballot(Ballot),
    Verdict(VerdictNotice),
    ListRequest,
    ListReply(String),
    Relay(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DataBody {
    Snapshot(Snapshot),
    Update(StateUpdate),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VoteBody {
    Verdict(VerdictNotice),
    Ballot(Ballot),
}

impl Message {
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Name(_) => TAG_NAME,
            Message::Handshake => TAG_HANDSHAKE,
            Message::Ack(_) => TAG_ACK,
            Message::Ping => TAG_PING,
            Message::Pong => TAG_PONG,
            Message::Update(_) | Message::Snapshot(_) => TAG_DATA,
            Message::Kill(_) => TAG_KILL,
            Message::Report(_) => TAG_REPORT,
            Message::Ballot(_) | Message::Verdict(_) => TAG_VOTE,
            Message::ListRequest => TAG_LIST,
            Message::ListReply(_) => TAG_LIST_REPLY,
            Message::Relay(_) => TAG_RELAY,
        }
    }

    /// Encodes the message as a single newline-free frame.
    pub fn encode(&self) -> String {
        let payload = match self {
            Message::Handshake | Message::Ping | Message::Pong | Message::ListRequest => None,
            Message::Ack(identity) => identity.map(|id| id.to_string()),
            Message::Name(text) | Message::Relay(text) | Message::ListReply(text) => {
                Some(single_line(text))
            }
            Message::Update(update) => Some(to_json(update)),
            Message::Snapshot(snapshot) => Some(to_json(snapshot)),
            Message::Kill(notice) => Some(to_json(notice)),
            Message::Report(report) => Some(to_json(report)),
            Message::Ballot(ballot) => Some(to_json(ballot)),
            Message::Verdict(notice) => Some(to_json(notice)),
        };

        match payload {
            Some(payload) => format!("{}/{}", self.tag(), payload),
            None => self.tag().to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let frame = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::parse(frame)
    }

    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim_end_matches(['\r', '\n']);
        if frame.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (tag, payload) = match frame.split_once('/') {
            Some((tag, payload)) => (tag, Some(payload)),
            None => (frame, None),
        };

        match tag {
            TAG_HANDSHAKE => Ok(Message::Handshake),
            TAG_PING => Ok(Message::Ping),
            TAG_PONG => Ok(Message::Pong),
            TAG_LIST => Ok(Message::ListRequest),
            TAG_ACK => match payload.filter(|p| !p.trim().is_empty()) {
                Some(identity) => Ok(Message::Ack(Some(identity.parse()?))),
                None => Ok(Message::Ack(None)),
            },
            TAG_NAME => {
                let name = require(TAG_NAME, payload)?.trim();
                if name.is_empty() {
                    return Err(ProtocolError::MissingPayload(TAG_NAME));
                }
                let len = name.chars().count();
                if len > MAX_NAME_LEN {
                    return Err(ProtocolError::NameTooLong {
                        len,
                        max: MAX_NAME_LEN,
                    });
                }
                Ok(Message::Name(name.to_string()))
            }
            TAG_RELAY => Ok(Message::Relay(require(TAG_RELAY, payload)?.to_string())),
            TAG_LIST_REPLY => Ok(Message::ListReply(
                require(TAG_LIST_REPLY, payload)?.to_string(),
            )),
            TAG_DATA => match from_json::<DataBody>(TAG_DATA, require(TAG_DATA, payload)?)? {
                DataBody::Snapshot(snapshot) if snapshot.is_finite() => {
                    Ok(Message::Snapshot(snapshot))
                }
                DataBody::Update(update) if update.is_finite() => Ok(Message::Update(update)),
                _ => Err(ProtocolError::NonFinite(TAG_DATA)),
            },
            TAG_VOTE => match from_json::<VoteBody>(TAG_VOTE, require(TAG_VOTE, payload)?)? {
                VoteBody::Verdict(notice) => Ok(Message::Verdict(notice)),
                VoteBody::Ballot(ballot) => Ok(Message::Ballot(ballot)),
            },
            TAG_KILL => {
                let notice: KillNotice = from_json(TAG_KILL, require(TAG_KILL, payload)?)?;
                if !(notice.x.is_finite() && notice.y.is_finite()) {
                    return Err(ProtocolError::NonFinite(TAG_KILL));
                }
                Ok(Message::Kill(notice))
            }
            TAG_REPORT => Ok(Message::Report(from_json(
                TAG_REPORT,
                require(TAG_REPORT, payload)?,
            )?)),
            other => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }
}

fn require<'a>(tag: &'static str, payload: Option<&'a str>) -> Result<&'a str, ProtocolError> {
    payload.ok_or(ProtocolError::MissingPayload(tag))
}

fn from_json<T: serde::de::DeserializeOwned>(
    tag: &'static str,
    payload: &str,
) -> Result<T, ProtocolError> {
    serde_json::from_str(payload).map_err(|source| ProtocolError::Json { tag, source })
}

fn to_json<T: Serialize>(value: &T) -> String {
    // Every payload type here is plain data with string map keys.
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Host availability broadcast on the discovery channel: `"<name>:<port>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: String,
    pub port: u16,
}

impl Advertisement {
    pub fn encode(&self) -> String {
        format!("{}:{}", single_line(&self.name), self.port)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        let (name, port) = text
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| ProtocolError::Advertisement(text.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ProtocolError::Advertisement(text.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, Status};
    use assert_approx_eq::assert_approx_eq;

    fn identity(s: &str) -> Identity {
        s.parse().unwrap()
    }

    #[test]
    fn test_control_frames_are_bare_tags() {
        assert_eq!(Message::Ping.encode(), "sys.ping");
        assert_eq!(Message::Pong.encode(), "sys.pong");
        assert_eq!(Message::Handshake.encode(), "sys.handshake");
        assert_eq!(Message::Ack(None).encode(), "sys.ack");
        assert_eq!(Message::ListRequest.encode(), "list");
    }

    #[test]
    fn test_ack_carries_observed_identity() {
        let ack = Message::Ack(Some(identity("10.0.0.7:40000")));
        assert_eq!(ack.encode(), "sys.ack/10.0.0.7:40000");
        assert_eq!(Message::parse("sys.ack/10.0.0.7:40000").unwrap(), ack);
        assert_eq!(Message::parse("sys.ack/").unwrap(), Message::Ack(None));
    }

    #[test]
    fn test_name_frame() {
        assert_eq!(Message::Name("Alice".into()).encode(), "name/Alice");
        assert_eq!(
            Message::parse("name/Bob/the builder").unwrap(),
            Message::Name("Bob/the builder".into())
        );
        assert!(matches!(
            Message::parse("name/  "),
            Err(ProtocolError::MissingPayload("name"))
        ));
        assert!(matches!(
            Message::parse("name"),
            Err(ProtocolError::MissingPayload("name"))
        ));
    }

    #[test]
    fn test_name_length_is_capped() {
        let at_limit = "a".repeat(MAX_NAME_LEN);
        assert_eq!(
            Message::parse(&format!("name/{}", at_limit)).unwrap(),
            Message::Name(at_limit)
        );

        let too_long = format!("name/{}", "a".repeat(4000));
        assert!(matches!(
            Message::parse(&too_long),
            Err(ProtocolError::NameTooLong { len: 4000, .. })
        ));
    }

    #[test]
    fn test_data_rejects_non_finite_positions() {
        // 1e39 is out of f32 range and decodes to infinity.
        let frame = r#"data/{"x":1e39,"y":0,"direction":"left","moving":false}"#;
        assert!(matches!(
            Message::parse(frame),
            Err(ProtocolError::NonFinite("data"))
        ));

        let frame = r#"data/{"x":0,"y":-1e39,"direction":"left","moving":false}"#;
        assert!(Message::parse(frame).is_err());

        let kill = r#"kill/{"victim":"127.0.0.1:4003","x":1e39,"y":0,"character":0,"timestamp":1}"#;
        assert!(matches!(
            Message::parse(kill),
            Err(ProtocolError::NonFinite("kill"))
        ));
    }

    #[test]
    fn test_text_payloads_are_single_line() {
        let frame = Message::Relay("hi\nthere".into()).encode();
        assert_eq!(frame, "relay/hi there");
        assert!(!frame.contains('\n'));
    }

    #[test]
    fn test_data_decodes_update_by_shape() {
        let frame = r#"data/{"x":10.0,"y":20.0,"direction":"left","moving":true}"#;
        match Message::parse(frame).unwrap() {
            Message::Update(update) => {
                assert_approx_eq!(update.x, 10.0);
                assert_approx_eq!(update.y, 20.0);
                assert_eq!(update.direction, Direction::Left);
                assert!(update.moving);
                assert_eq!(update.character, None);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_data_decodes_snapshot_by_shape() {
        let host = identity("192.168.0.2:51000");
        let peer = identity("192.168.0.3:40000");
        let mut participants = BTreeMap::new();
        participants.insert(host, ParticipantRecord::named("Alice"));
        let mut record = ParticipantRecord::named("Bob");
        record.x = 10.0;
        record.y = 20.0;
        record.status = Status::Imposter;
        participants.insert(peer, record.clone());

        let frame = Message::Snapshot(Snapshot { host, participants }).encode();
        assert!(frame.starts_with("data/{"));

        match Message::parse(&frame).unwrap() {
            Message::Snapshot(snapshot) => {
                assert_eq!(snapshot.host, host);
                assert_eq!(snapshot.participants.len(), 2);
                assert_eq!(snapshot.participants.get(&peer), Some(&record));
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_vote_decodes_ballot_and_verdict_by_shape() {
        let voter = identity("127.0.0.1:4001");
        let target = identity("127.0.0.1:4002");

        let ballot = Message::Ballot(Ballot {
            meeting_id: 9,
            voter,
            target: BallotTarget::Participant(target),
        });
        assert_eq!(Message::parse(&ballot.encode()).unwrap(), ballot);

        let skip = Message::parse(r#"vote/{"meeting_id":9,"voter":"127.0.0.1:4001","target":"skip"}"#)
            .unwrap();
        assert!(matches!(
            skip,
            Message::Ballot(Ballot {
                target: BallotTarget::Skip,
                ..
            })
        ));

        let mut tally = BTreeMap::new();
        tally.insert(BallotTarget::Participant(target), 3);
        tally.insert(BallotTarget::Skip, 1);
        let verdict = Message::Verdict(VerdictNotice {
            meeting_id: 9,
            verdict: Verdict::Ejected(target),
            tally,
        });
        assert_eq!(Message::parse(&verdict.encode()).unwrap(), verdict);
    }

    #[test]
    fn test_report_without_victim_is_emergency() {
        let report = Message::parse(r#"report/{"reporter":"127.0.0.1:4001"}"#).unwrap();
        match report {
            Message::Report(report) => {
                assert_eq!(report.victim, None);
                assert_eq!(report.meeting_id, None);
            }
            other => panic!("expected report, got {:?}", other),
        }
    }

    #[test]
    fn test_kill_frame() {
        let notice = KillNotice {
            victim: identity("127.0.0.1:4003"),
            x: 5.5,
            y: 6.5,
            character: 2,
            timestamp: 1_700_000_000_000,
        };
        let frame = Message::Kill(notice).encode();
        assert_eq!(Message::parse(&frame).unwrap(), Message::Kill(notice));
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        assert!(matches!(
            Message::parse("teleport/1,2"),
            Err(ProtocolError::UnknownTag(tag)) if tag == "teleport"
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(Message::parse(""), Err(ProtocolError::Empty)));
        assert!(matches!(
            Message::parse("data/{not json"),
            Err(ProtocolError::Json { tag: "data", .. })
        ));
        assert!(matches!(
            Message::parse(r#"data/{"name":"x"}"#),
            Err(ProtocolError::Json { tag: "data", .. })
        ));
        assert!(matches!(
            Message::parse("data"),
            Err(ProtocolError::MissingPayload("data"))
        ));
        assert!(matches!(
            Message::decode(&[0xff, 0xfe]),
            Err(ProtocolError::NotUtf8)
        ));
    }

    #[test]
    fn test_ballot_target_parsing() {
        assert_eq!("skip".parse::<BallotTarget>().unwrap(), BallotTarget::Skip);
        assert_eq!("SKIP".parse::<BallotTarget>().unwrap(), BallotTarget::Skip);
        assert_eq!(
            "127.0.0.1:9".parse::<BallotTarget>().unwrap(),
            BallotTarget::Participant(identity("127.0.0.1:9"))
        );
        assert!("nobody".parse::<BallotTarget>().is_err());
    }

    #[test]
    fn test_advertisement() {
        let ad = Advertisement {
            name: "Alice".into(),
            port: 51000,
        };
        assert_eq!(ad.encode(), "Alice:51000");
        assert_eq!(Advertisement::decode(b"Alice:51000").unwrap(), ad);

        let odd = Advertisement::decode(b"Host: the best:51000").unwrap();
        assert_eq!(odd.name, "Host: the best");
        assert_eq!(odd.port, 51000);

        assert!(Advertisement::decode(b"no-port").is_err());
        assert!(Advertisement::decode(b"Alice:port").is_err());
    }
}
