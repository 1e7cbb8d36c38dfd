//! Extended M3U playlist parsing.
//!
//! The parser pairs every `#EXTINF:` line with the line that follows it and
//! turns each pair into a [`Channel`]. It never fails: anything it cannot make
//! sense of is skipped, so bad input shows up as fewer (or zero) channels.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const EXTINF_PREFIX: &str = "#EXTINF:";
pub const DEFAULT_GROUP: &str = "No Group";
pub const DEFAULT_TITLE: &str = "No title";

lazy_static! {
    static ref TVG_ID: Regex = Regex::new(r#"tvg-id="([^"]*)""#).unwrap();
    static ref TVG_NAME: Regex = Regex::new(r#"tvg-name="([^"]*)""#).unwrap();
    static ref TVG_LOGO: Regex = Regex::new(r#"tvg-logo="([^"]*)""#).unwrap();
    static ref GROUP_TITLE: Regex = Regex::new(r#"group-title="([^"]*)""#).unwrap();
}

/// One playable entry of a playlist.
///
/// Every field is a plain string; a missing attribute is the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Channel {
    pub title: String,
    pub tvg_id: String,
    pub tvg_name: String,
    pub tvg_logo: String,
    pub group_title: String,
    pub url: String,
}

impl Channel {
    /// Group label with the parser's default applied.
    pub fn group(&self) -> &str {
        if self.group_title.is_empty() {
            DEFAULT_GROUP
        } else {
            &self.group_title
        }
    }
}

/// Stable identifier for a channel, derived from title, url and group.
///
/// Persisted by the favorites store, so it must not change between builds.
pub fn channel_id(channel: &Channel) -> String {
    let hash = channel
        .title
        .encode_utf16()
        .chain(channel.url.encode_utf16())
        .chain(channel.group_title.encode_utf16())
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)));
    format!("{hash:08x}")
}

/// Whatever the caller has in hand when asking for a parse.
#[derive(Debug, Clone)]
pub enum PlaylistInput<'a> {
    Absent,
    NotText(&'static str),
    Text(Cow<'a, str>),
}

impl<'a> From<&'a str> for PlaylistInput<'a> {
    fn from(text: &'a str) -> Self {
        PlaylistInput::Text(Cow::Borrowed(text))
    }
}

impl<'a> From<&'a String> for PlaylistInput<'a> {
    fn from(text: &'a String) -> Self {
        PlaylistInput::Text(Cow::Borrowed(text.as_str()))
    }
}

impl From<String> for PlaylistInput<'static> {
    fn from(text: String) -> Self {
        PlaylistInput::Text(Cow::Owned(text))
    }
}

impl<'a> From<Option<&'a str>> for PlaylistInput<'a> {
    fn from(text: Option<&'a str>) -> Self {
        text.map_or(PlaylistInput::Absent, PlaylistInput::from)
    }
}

impl<'a> From<&'a [u8]> for PlaylistInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        PlaylistInput::Text(String::from_utf8_lossy(bytes))
    }
}

impl<'a> From<&'a serde_json::Value> for PlaylistInput<'a> {
    fn from(value: &'a serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => PlaylistInput::Absent,
            Value::String(text) => PlaylistInput::Text(Cow::Borrowed(text.as_str())),
            Value::Bool(_) => PlaylistInput::NotText("boolean"),
            Value::Number(_) => PlaylistInput::NotText("number"),
            Value::Array(_) => PlaylistInput::NotText("array"),
            Value::Object(_) => PlaylistInput::NotText("object"),
        }
    }
}

/// Why an input produced no channels before scanning started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejection {
    Absent,
    NotText(&'static str),
    Blank,
}

impl fmt::Display for InputRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRejection::Absent => write!(f, "playlist content is absent"),
            InputRejection::NotText(kind) => write!(f, "playlist content is not text ({kind})"),
            InputRejection::Blank => write!(f, "playlist content is empty"),
        }
    }
}

/// A single `#EXTINF` entry that could not be turned into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryError {
    MissingExtinfPrefix,
    EmptyUrl,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryError::MissingExtinfPrefix => write!(f, "metadata line does not start with {EXTINF_PREFIX}"),
            EntryError::EmptyUrl => write!(f, "url line is empty"),
        }
    }
}

impl std::error::Error for EntryError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The metadata line was the last line of the playlist.
    MissingUrl,
    /// The metadata line was followed by another `#` line.
    FollowedByDirective,
    Malformed(EntryError),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingUrl => write!(f, "no url line follows"),
            DropReason::FollowedByDirective => write!(f, "followed by another directive"),
            DropReason::Malformed(err) => write!(f, "{err}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EntryDrop<'a> {
    pub metadata: &'a str,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    pub lines: usize,
    pub channels: usize,
    pub dropped: usize,
}

/// Receives diagnostics while a playlist is parsed.
///
/// Observers only watch; nothing they do changes the parse result.
pub trait ParseObserver {
    fn input_rejected(&self, _reason: InputRejection) {}
    fn entry_dropped(&self, _drop: &EntryDrop<'_>) {}
    fn finished(&self, _summary: &ParseSummary) {}
}

pub struct NoopObserver;

impl ParseObserver for NoopObserver {}

/// Reports parse diagnostics as `tracing` events.
pub struct TracingObserver;

impl ParseObserver for TracingObserver {
    fn input_rejected(&self, reason: InputRejection) {
        warn!("M3U input rejected: {}", reason);
    }

    fn entry_dropped(&self, drop: &EntryDrop<'_>) {
        debug!("Dropped M3U entry: reason=\"{}\" line=\"{}\"", drop.reason, drop.metadata);
    }

    fn finished(&self, summary: &ParseSummary) {
        debug!(
            "Parsed M3U: lines={} channels={} dropped={}",
            summary.lines,
            summary.channels,
            summary.dropped
        );
    }
}

/// Counts what happened during a parse and forwards everything to tracing.
#[derive(Debug, Default)]
pub struct ParseStats {
    rejected: AtomicBool,
    channels: AtomicUsize,
    dropped: AtomicUsize,
}

impl ParseStats {
    pub fn rejected(&self) -> bool {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn channels(&self) -> usize {
        self.channels.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ParseObserver for ParseStats {
    fn input_rejected(&self, reason: InputRejection) {
        self.rejected.store(true, Ordering::Relaxed);
        TracingObserver.input_rejected(reason);
    }

    fn entry_dropped(&self, drop: &EntryDrop<'_>) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        TracingObserver.entry_dropped(drop);
    }

    fn finished(&self, summary: &ParseSummary) {
        self.channels.store(summary.channels, Ordering::Relaxed);
        TracingObserver.finished(summary);
    }
}

// Also strips U+FEFF so a byte order mark never sticks to the first line.
fn trim_text(text: &str) -> &str {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}')
}

fn capture<'a>(re: &Regex, line: &'a str) -> &'a str {
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map_or("", |m| m.as_str())
}

/// Parse playlist text into channels, logging diagnostics through `tracing`.
pub fn parse_m3u<'a>(input: impl Into<PlaylistInput<'a>>) -> Vec<Channel> {
    parse_m3u_with(input, &TracingObserver)
}

/// Parse playlist text into channels, reporting diagnostics to `observer`.
pub fn parse_m3u_with<'a>(
    input: impl Into<PlaylistInput<'a>>,
    observer: &dyn ParseObserver,
) -> Vec<Channel> {
    let content = match input.into() {
        PlaylistInput::Absent => {
            observer.input_rejected(InputRejection::Absent);
            return Vec::new();
        }
        PlaylistInput::NotText(kind) => {
            observer.input_rejected(InputRejection::NotText(kind));
            return Vec::new();
        }
        PlaylistInput::Text(text) => text,
    };

    if trim_text(&content).is_empty() {
        observer.input_rejected(InputRejection::Blank);
        return Vec::new();
    }

    let lines: Vec<&str> = content
        .split('\n')
        .map(trim_text)
        .filter(|line| !line.is_empty())
        .collect();

    let mut channels = Vec::new();
    let mut dropped = 0;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if !line.starts_with(EXTINF_PREFIX) {
            i += 1;
            continue;
        }

        match lines.get(i + 1) {
            Some(url) if !url.starts_with('#') => {
                match parse_extinf(line, url) {
                    Ok(channel) => channels.push(channel),
                    Err(err) => {
                        dropped += 1;
                        observer.entry_dropped(&EntryDrop {
                            metadata: line,
                            reason: DropReason::Malformed(err),
                        });
                    }
                }
                i += 2;
            }
            next => {
                dropped += 1;
                let reason = if next.is_some() {
                    DropReason::FollowedByDirective
                } else {
                    DropReason::MissingUrl
                };
                observer.entry_dropped(&EntryDrop { metadata: line, reason });
                i += 1;
            }
        }
    }

    observer.finished(&ParseSummary {
        lines: lines.len(),
        channels: channels.len(),
        dropped,
    });
    channels
}

/// Build a channel from one `#EXTINF:` line and the url line after it.
pub fn parse_extinf(metadata: &str, url: &str) -> Result<Channel, EntryError> {
    if !metadata.starts_with(EXTINF_PREFIX) {
        return Err(EntryError::MissingExtinfPrefix);
    }
    let url = trim_text(url);
    if url.is_empty() {
        return Err(EntryError::EmptyUrl);
    }

    let tvg_id = capture(&TVG_ID, metadata);
    let tvg_name = capture(&TVG_NAME, metadata);
    let tvg_logo = capture(&TVG_LOGO, metadata);
    let group_title = match capture(&GROUP_TITLE, metadata) {
        "" => DEFAULT_GROUP,
        group => group,
    };

    let trailing = metadata
        .rfind(',')
        .map(|pos| trim_text(&metadata[pos + 1..]))
        .filter(|title| !title.is_empty());
    let title = match trailing {
        Some(title) => title,
        None if !tvg_name.is_empty() => tvg_name,
        None => DEFAULT_TITLE,
    };

    Ok(Channel {
        title: title.to_string(),
        tvg_id: tvg_id.to_string(),
        tvg_name: tvg_name.to_string(),
        tvg_logo: tvg_logo.to_string(),
        group_title: group_title.to_string(),
        url: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_entry() {
        let data = r#"#EXTM3U
#EXTINF:-1 tvg-id="bbc1" tvg-name="BBC One" tvg-logo="http://x/logo.png" group-title="UK",BBC One HD
http://example.com/bbc1.m3u8"#;

        let channels = parse_m3u(data);
        assert_eq!(
            channels,
            vec![Channel {
                title: "BBC One HD".to_string(),
                tvg_id: "bbc1".to_string(),
                tvg_name: "BBC One".to_string(),
                tvg_logo: "http://x/logo.png".to_string(),
                group_title: "UK".to_string(),
                url: "http://example.com/bbc1.m3u8".to_string(),
            }]
        );
    }

    #[test]
    fn test_empty_and_missing_input() {
        assert!(parse_m3u("").is_empty());
        assert!(parse_m3u("   \n\t\r\n  ").is_empty());
        assert!(parse_m3u(None::<&str>).is_empty());
        assert!(parse_m3u(&serde_json::Value::Null).is_empty());
        assert!(parse_m3u(&serde_json::json!(42)).is_empty());
        assert!(parse_m3u(&serde_json::json!(["#EXTINF:-1,A", "http://a"])).is_empty());
        assert!(parse_m3u(&serde_json::json!({ "content": "x" })).is_empty());
    }

    #[test]
    fn test_json_string_input_is_parsed() {
        let value = serde_json::json!("#EXTINF:-1,Json\nhttp://example.com/json.m3u8");
        let channels = parse_m3u(&value);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].title, "Json");
    }

    #[test]
    fn test_orphan_metadata_does_not_desync() {
        let data = "#EXTINF:-1,Orphan Channel\n#EXTINF:-1,Next Channel\nhttp://example.com/next.m3u8";
        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].title, "Next Channel");
        assert_eq!(channels[0].url, "http://example.com/next.m3u8");
    }

    #[test]
    fn test_trailing_metadata_without_url() {
        let data = "#EXTINF:-1,First\nhttp://a/1\n#EXTINF:-1,Dangling";
        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].title, "First");
    }

    #[test]
    fn test_empty_group_defaults() {
        let data = "#EXTINF:-1 group-title=\"\",No Group Test\nhttp://example.com/a.m3u8";
        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].group_title, DEFAULT_GROUP);
        assert_eq!(channels[0].title, "No Group Test");
    }

    #[test]
    fn test_missing_group_defaults() {
        let channels = parse_m3u("#EXTINF:-1,Plain\nhttp://example.com/p.m3u8");
        assert_eq!(channels[0].group_title, "No Group");
        assert_eq!(channels[0].tvg_id, "");
        assert_eq!(channels[0].tvg_logo, "");
    }

    #[test]
    fn test_title_fallbacks() {
        let channels = parse_m3u("#EXTINF:-1\nhttp://example.com/b.m3u8");
        assert_eq!(channels[0].title, "No title");

        let channels = parse_m3u("#EXTINF:-1 tvg-name=\"Named\"\nhttp://example.com/c.m3u8");
        assert_eq!(channels[0].title, "Named");

        let channels = parse_m3u("#EXTINF:-1 tvg-name=\"Named\",   \nhttp://example.com/d.m3u8");
        assert_eq!(channels[0].title, "Named");
    }

    #[test]
    fn test_title_after_last_comma() {
        let data = "#EXTINF:-1 group-title=\"News, World\",  Channel 24  \nhttp://example.com/24";
        let channels = parse_m3u(data);
        assert_eq!(channels[0].title, "Channel 24");
        assert_eq!(channels[0].group_title, "News, World");
    }

    #[test]
    fn test_first_attribute_match_wins() {
        let data = "#EXTINF:-1 tvg-id=\"first\" tvg-id=\"second\",Dup\nhttp://example.com/dup";
        let channels = parse_m3u(data);
        assert_eq!(channels[0].tvg_id, "first");
    }

    #[test]
    fn test_url_is_trimmed_and_not_validated() {
        let data = "#EXTINF:-1,Odd\n   udp://@239.0.0.1:1234   \n#EXTINF:-1,Rel\nstream/segment.ts";
        let channels = parse_m3u(data);
        assert_eq!(channels[0].url, "udp://@239.0.0.1:1234");
        assert_eq!(channels[1].url, "stream/segment.ts");
    }

    #[test]
    fn test_crlf_bom_and_blank_lines() {
        let data = "\u{feff}#EXTM3U\r\n\r\n#EXTINF:-1 tvg-id=\"a\",A\r\n\r\nhttp://example.com/a\r\n";
        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].title, "A");
        assert_eq!(channels[0].url, "http://example.com/a");
    }

    #[test]
    fn test_header_is_optional_and_comments_ignored() {
        let data = "#EXTINF:0,3sat SD\n#EXTVLCOPT:network-caching=1000\nrtsp://192.168.178.1:554/?freq=450\n#EXTINF:0,KiKA SD\nrtsp://192.168.178.1:554/?freq=451";
        let channels = parse_m3u(data);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].title, "KiKA SD");
    }

    #[test]
    fn test_bytes_are_decoded_lossily() {
        let mut data = b"#EXTINF:-1,Caf".to_vec();
        data.push(0xe9);
        data.extend_from_slice(b"\nhttp://example.com/cafe");
        let channels = parse_m3u(data.as_slice());
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].title, "Caf\u{fffd}");
    }

    #[test]
    fn test_order_and_repeatability() {
        let data = r#"#EXTM3U
#EXTINF:-1 group-title="B",Zeta
http://example.com/z
#EXTINF:-1 group-title="A",Alpha
http://example.com/a
#EXTINF:-1 group-title="B",Zeta
http://example.com/z
"#;
        let first = parse_m3u(data);
        let second = parse_m3u(data);
        assert_eq!(first, second);
        let titles: Vec<&str> = first.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Zeta", "Alpha", "Zeta"]);
    }

    #[test]
    fn test_observer_does_not_change_result() {
        let data = "#EXTINF:-1,Lonely\n#EXTINF:-1,Kept\nhttp://example.com/k\n#EXTINF:-1,End";
        let stats = ParseStats::default();
        let observed = parse_m3u_with(data, &stats);
        assert_eq!(observed, parse_m3u_with(data, &NoopObserver));
        assert_eq!(stats.channels(), 1);
        assert_eq!(stats.dropped(), 2);
        assert!(!stats.rejected());

        let stats = ParseStats::default();
        assert!(parse_m3u_with("  ", &stats).is_empty());
        assert!(stats.rejected());
    }

    #[test]
    fn test_parse_extinf_errors() {
        assert_eq!(
            parse_extinf("EXTINF:-1,Missing hash", "http://example.com"),
            Err(EntryError::MissingExtinfPrefix)
        );
        assert_eq!(parse_extinf("#EXTINF:-1,Blank", "   "), Err(EntryError::EmptyUrl));
    }

    #[test]
    fn test_channel_id_is_stable() {
        let channel = Channel {
            title: "BBC One HD".to_string(),
            url: "http://example.com/bbc1.m3u8".to_string(),
            group_title: "UK".to_string(),
            ..Default::default()
        };
        let id = channel_id(&channel);
        assert_eq!(id.len(), 8);
        assert_eq!(id, channel_id(&channel.clone()));

        let mut other = channel.clone();
        other.group_title = "US".to_string();
        assert_ne!(id, channel_id(&other));

        // tvg fields are not part of the identity
        let mut logo = channel.clone();
        logo.tvg_logo = "http://x/logo.png".to_string();
        assert_eq!(id, channel_id(&logo));
    }

    #[test]
    fn test_channel_id_known_value() {
        let channel = Channel {
            title: "a".to_string(),
            ..Default::default()
        };
        assert_eq!(channel_id(&channel), format!("{:08x}", 'a' as u32));
    }
}
