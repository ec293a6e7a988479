//! Pure extractors turning one Media-Server item (path + stream metadata)
//! into the display tags stored in `asset_details_json`.
//!
//! Priority is strict: the filename wins, stream metadata is the fallback.

use std::sync::OnceLock;

use regex::Regex;

use crate::clients::emby::{EmbyItem, MediaStream};
use crate::models::media::{AssetDetails, AudioTrack, SubtitleTrack};

const AUDIO_DISPLAY: &[(&str, &str)] = &[
    ("chi", "国语"),
    ("yue", "粤语"),
    ("eng", "英语"),
    ("jpn", "日语"),
    ("kor", "韩语"),
];

const SUB_DISPLAY: &[(&str, &str)] = &[
    ("chi", "简体"),
    ("yue", "繁体"),
    ("eng", "英文"),
    ("jpn", "日文"),
    ("kor", "韩文"),
];

const AUDIO_TITLE_KEYWORDS: &[(&str, &[&str])] = &[
    ("chi", &["Mandarin", "CHI", "ZHO", "国语", "国配", "国英双语", "公映", "台配", "京译", "上译", "央译"]),
    ("yue", &["Cantonese", "YUE", "粤语"]),
    ("eng", &["English", "ENG", "英语"]),
    ("jpn", &["Japanese", "JPN", "日语"]),
    ("kor", &["Korean", "KOR", "韩语"]),
];

const SUB_TITLE_KEYWORDS: &[(&str, &[&str])] = &[
    ("chi", &["CHS", "SC", "GB", "简体", "简中", "简", "中字"]),
    ("yue", &["CHT", "TC", "BIG5", "繁體", "繁体", "繁"]),
    ("eng", &["ENG", "英字"]),
    ("jpn", &["JPN", "日字", "日文"]),
    ("kor", &["KOR", "韩字", "韩文"]),
];

/// Release group dictionary: display name → alias patterns matched against
/// the filename (case-insensitive regex).
const RELEASE_GROUPS: &[(&str, &[&str])] = &[
    ("彩虹岛", &["CHD(?:Bits|PAD|(?:|HK)TV|WEB|)", "StBOX", "OneHD", "Lee", "xiaopie"]),
    ("备胎", &["BeiTai"]),
    ("学校", &["Bts(?:CHOOL|HD|PAD|TV)", "Zone"]),
    ("高清视界", &["HDA(?:pad|rea|TV)", "EPiC"]),
    ("杜比", &["D(?:ream|BTV)", "(?:HD|QHstudI)o"]),
    ("红豆饭", &["beAst(?:TV|)", "HDFans"]),
    ("家园", &["HDH(?:ome|Pad|TV|WEB|)"]),
    ("天空", &["HDS(?:ky|TV|Pad|WEB|)", "AQLJ"]),
    ("憨憨", &["HHWEB"]),
    ("朋友", &["FRDS", "Yumi", "cXcY"]),
    ("柠檬", &["L(?:eague(?:(?:C|H)D|(?:M|T)V|NF|WEB)|HD)", "i18n", "CiNT"]),
    ("馒头", &["MTeam(?:TV|)", "MPAD", "MWeb"]),
    ("我堡", &["Our(?:Bits|TV)", "FLTTH", "Ao", "PbK", "MGs", "iLove(?:HD|TV)"]),
    ("猪猪", &["PiGo(?:NF|(?:H|WE)B)"]),
    ("猫站", &["PTer(?:DIY|Game|(?:M|T)V|WEB|)"]),
    ("烧包", &["PTsbao", "OPS", "F(?:Fans(?:AIeNcE|BD|D(?:VD|IY)|TV|WEB)|HDMv)", "SGXT"]),
    ("葡萄", &["PuTao"]),
    ("春天", &["CMCT(?:A|V)?", "Oldboys", "GTR", "CLV", "CatEDU", "Telesto", "iFree"]),
    ("鲨鱼", &["Shark(?:WEB|DIY|TV|MV|)"]),
    ("听听歌", &["TTG", "WiKi", "NGB", "DoA", "(?:ARi|ExRE)N"]),
    ("观众", &["Audies", "AD(?:Audio|E(?:book|)|Music|Web)"]),
    (
        "others",
        &[
            "B(?:MDru|eyondHD|TN)",
            "C(?:fandora|trlhd|MRG)",
            "DON",
            "EVO",
            "FLUX",
            "HONE(?:yG|)",
            "N(?:oGroup|T(?:b|G))",
            "PandaMoon",
            "SMURF",
            "T(?:EPES|aengoo|rollHD )",
        ],
    ),
    (
        "anime",
        &[
            "ANi", "HYSUB", "KTXP", "LoliHouse", "MCE", "Nekomoe kissaten", "SweetSub", "MingY",
            "(?:Lilith|NC)-Raws", "织梦字幕组", "喵萌奶茶屋", "樱都字幕组", "极影字幕社",
            "悠哈璃羽字幕社",
        ],
    ),
];

fn release_group_patterns() -> &'static Vec<(&'static str, Regex)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RELEASE_GROUPS
            .iter()
            .flat_map(|(group, aliases)| {
                aliases.iter().filter_map(|alias| {
                    Regex::new(&format!("(?i){alias}"))
                        .ok()
                        .map(|re| (*group, re))
                })
            })
            .collect()
    })
}

/// Resolution tier from video stream width, ranked for comparisons.
#[must_use]
pub const fn resolution_tier(width: i32) -> (u8, &'static str) {
    if width >= 3800 {
        (4, "4k")
    } else if width >= 1900 {
        (3, "1080p")
    } else if width >= 1200 {
        (2, "720p")
    } else if width >= 700 {
        (1, "480p")
    } else {
        (0, "未知")
    }
}

fn resolution_from_name(name_lower: &str) -> &'static str {
    if name_lower.contains("2160p") || name_lower.contains("4k") {
        "4k"
    } else if name_lower.contains("1080p") {
        "1080p"
    } else if name_lower.contains("720p") {
        "720p"
    } else if name_lower.contains("480p") {
        "480p"
    } else {
        "未知"
    }
}

/// Quality tag from the filename. The hierarchy is ordered: the first tag
/// found wins, so a "BluRay Remux" file reports Remux.
#[must_use]
pub fn quality_tag(name_lower: &str) -> &'static str {
    const HIERARCHY: &[(&str, &str)] = &[
        ("remux", "Remux"),
        ("bluray", "BluRay"),
        ("blu-ray", "BluRay"),
        ("web-dl", "WEB-DL"),
        ("webdl", "WEB-DL"),
        ("webrip", "WEBrip"),
        ("hdtv", "HDTV"),
        ("dvdrip", "DVDrip"),
    ];
    for (tag, display) in HIERARCHY {
        if name_lower.contains(tag) {
            return display;
        }
    }
    "未知"
}

/// Dynamic-range tag. Filename first, then the video stream, default SDR.
#[must_use]
pub fn effect_tag(name_lower: &str, video_stream: Option<&MediaStream>) -> &'static str {
    let has_dovi = name_lower.contains("dovi") || name_lower.contains("dolbyvision");
    if has_dovi && name_lower.contains("hdr") {
        return "dovi_p8";
    }
    if ["dovi p7", "dovi.p7", "dv.p7", "profile 7", "profile7"]
        .iter()
        .any(|s| name_lower.contains(s))
    {
        return "dovi_p7";
    }
    if ["dovi p5", "dovi.p5", "dv.p5", "profile 5", "profile5"]
        .iter()
        .any(|s| name_lower.contains(s))
    {
        return "dovi_p5";
    }
    if has_dovi {
        return "dovi_other";
    }
    if name_lower.contains("hdr10+") || name_lower.contains("hdr10plus") {
        return "hdr10+";
    }
    if name_lower.contains("hdr") {
        return "hdr";
    }

    if let Some(stream) = video_stream {
        let combined = stream.combined_info();
        if combined.contains("doviprofile81") || combined.contains("dvhe.08") || combined.contains("dvh1.08") {
            return "dovi_p8";
        }
        if combined.contains("doviprofile76") || combined.contains("dvhe.07") || combined.contains("dvh1.07") {
            return "dovi_p7";
        }
        if combined.contains("doviprofile5") || combined.contains("dvhe.05") || combined.contains("dvh1.05") {
            return "dovi_p5";
        }
        if combined.contains("dovi") || combined.contains("dolby") {
            return "dovi_other";
        }
        if combined.contains("hdr10+") || combined.contains("hdr10plus") {
            return "hdr10+";
        }
        if combined.contains("hdr") {
            return "hdr";
        }
    }

    "sdr"
}

fn effect_display(tag: &str) -> &'static str {
    match tag {
        "dovi_p8" => "DoVi_P8",
        "dovi_p7" => "DoVi_P7",
        "dovi_p5" => "DoVi_P5",
        "dovi_other" => "DoVi",
        "hdr10+" => "HDR10+",
        "hdr" => "HDR",
        _ => "SDR",
    }
}

const CODEC_DISPLAY: &[(&str, &str)] = &[
    ("hevc", "HEVC"),
    ("h265", "HEVC"),
    ("x265", "HEVC"),
    ("h264", "H.264"),
    ("avc", "H.264"),
    ("x264", "H.264"),
    ("vp9", "VP9"),
    ("av1", "AV1"),
];

fn codec_display(video_stream: Option<&MediaStream>, name_lower: &str) -> String {
    if let Some(codec) = video_stream.and_then(|s| s.codec.as_deref()) {
        let raw = codec.to_lowercase();
        return CODEC_DISPLAY
            .iter()
            .find(|(k, _)| *k == raw)
            .map_or_else(|| raw.to_uppercase(), |(_, v)| (*v).to_string());
    }
    for (key, display) in CODEC_DISPLAY {
        if name_lower.contains(key) {
            return (*display).to_string();
        }
    }
    "未知".to_string()
}

fn detect_languages(streams: &[MediaStream], stream_type: &str) -> Vec<String> {
    const LANGUAGE_CODES: &[(&str, &[&str])] = &[
        ("chi", &["chi", "zho", "chs", "zh-cn", "zh-hans", "zh-sg", "cmn"]),
        ("yue", &["yue", "cht"]),
        ("eng", &["eng"]),
        ("jpn", &["jpn"]),
        ("kor", &["kor"]),
    ];

    let keywords = if stream_type == "Audio" {
        AUDIO_TITLE_KEYWORDS
    } else {
        SUB_TITLE_KEYWORDS
    };

    let mut detected = Vec::new();
    let mut push = |lang: &str| {
        if !detected.iter().any(|l| l == lang) {
            detected.push(lang.to_string());
        }
    };

    for stream in streams.iter().filter(|s| s.stream_type == stream_type) {
        if let Some(code) = stream.language.as_deref().map(str::to_lowercase) {
            for (lang, codes) in LANGUAGE_CODES {
                if codes.contains(&code.as_str()) {
                    push(lang);
                }
            }
        }

        let title = format!(
            "{}{}",
            stream.title.as_deref().unwrap_or(""),
            stream.display_title.as_deref().unwrap_or("")
        )
        .to_lowercase();
        if title.is_empty() {
            continue;
        }
        for (lang, words) in keywords {
            if words.iter().any(|w| title.contains(&w.to_lowercase())) {
                push(lang);
            }
        }
    }

    detected.sort();
    detected
}

fn display_join(langs: &[String], table: &[(&str, &str)]) -> String {
    let joined = langs
        .iter()
        .map(|lang| {
            table
                .iter()
                .find(|(k, _)| k == lang)
                .map_or(lang.as_str(), |(_, v)| *v)
        })
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        "无".to_string()
    } else {
        joined
    }
}

/// Release groups recognized in the filename. At most one group is
/// reported; the first dictionary entry that matches wins.
#[must_use]
pub fn release_groups_for(filename: &str) -> Vec<String> {
    if filename.is_empty() {
        return Vec::new();
    }
    let stem = filename.rsplit_once('.').map_or(filename, |(s, _)| s);
    for (group, re) in release_group_patterns() {
        if re.is_match(stem) {
            return vec![(*group).to_string()];
        }
    }
    Vec::new()
}

/// Build the full per-version asset record for one Media-Server item.
#[must_use]
pub fn parse_asset_details(item: &EmbyItem) -> AssetDetails {
    let path = item.path.clone().unwrap_or_default();
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or("").to_string();
    let name_lower = file_name.to_lowercase();

    let streams = item.media_streams.as_deref().unwrap_or(&[]);
    let video_stream = streams.iter().find(|s| s.stream_type == "Video");

    let mut details = AssetDetails {
        emby_item_id: Some(item.id.clone()),
        path,
        size_bytes: item.size,
        container: item.container.clone(),
        runtime_minutes: item.run_time_ticks.map(|ticks| ticks / 600_000_000),
        date_added: item.date_created.clone(),
        ..AssetDetails::default()
    };

    if let Some(video) = video_stream {
        details.video_codec = video.codec.clone();
        details.width = video.width;
        details.height = video.height;
        details.bit_depth = video.bit_depth;
        details.frame_rate = video.average_frame_rate.or(video.real_frame_rate);
        #[allow(clippy::cast_precision_loss)]
        {
            details.video_bitrate_mbps = video
                .bit_rate
                .map(|rate| (rate as f64 / 1_000_000.0 * 10.0).round() / 10.0);
        }
    }

    for stream in streams {
        match stream.stream_type.as_str() {
            "Audio" => details.audio_tracks.push(AudioTrack {
                language: stream.language.clone(),
                codec: stream.codec.clone(),
                channels: stream.channels,
                display_title: stream.display_title.clone(),
                is_default: stream.is_default.unwrap_or(false),
            }),
            "Subtitle" => details.subtitles.push(SubtitleTrack {
                language: stream.language.clone(),
                display_title: stream.display_title.clone(),
                is_forced: stream.is_forced.unwrap_or(false),
                format: stream.codec.clone(),
            }),
            _ => {}
        }
    }

    details.resolution_display = video_stream
        .and_then(|s| s.width)
        .map(|w| resolution_tier(w).1)
        .filter(|r| *r != "未知")
        .unwrap_or_else(|| resolution_from_name(&name_lower))
        .to_string();
    details.quality_display = quality_tag(&name_lower).to_string();
    details.effect_display = effect_display(effect_tag(&name_lower, video_stream)).to_string();
    details.codec_display = codec_display(video_stream, &name_lower);

    details.audio_languages = detect_languages(streams, "Audio");
    let mut sub_langs = detect_languages(streams, "Subtitle");
    // An external subtitle with no recognizable language is almost always a
    // fetched Chinese sub.
    let has_external_sub = streams
        .iter()
        .any(|s| s.stream_type == "Subtitle" && s.is_external.unwrap_or(false));
    if has_external_sub && !sub_langs.iter().any(|l| l == "chi" || l == "yue") {
        sub_langs.push("chi".to_string());
        sub_langs.sort();
    }
    details.subtitle_languages = sub_langs;

    details.audio_display = display_join(&details.audio_languages, AUDIO_DISPLAY);
    details.subtitle_display = display_join(&details.subtitle_languages, SUB_DISPLAY);
    details.release_group = release_groups_for(&file_name);

    details
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream(width: i32) -> MediaStream {
        MediaStream {
            stream_type: "Video".to_string(),
            codec: Some("hevc".to_string()),
            width: Some(width),
            ..MediaStream::default()
        }
    }

    #[test]
    fn resolution_tiers_by_width() {
        assert_eq!(resolution_tier(3840).1, "4k");
        assert_eq!(resolution_tier(1920).1, "1080p");
        assert_eq!(resolution_tier(1280).1, "720p");
        assert_eq!(resolution_tier(720).1, "480p");
        assert_eq!(resolution_tier(100).1, "未知");
    }

    #[test]
    fn quality_hierarchy_prefers_remux() {
        assert_eq!(quality_tag("movie.2023.bluray.remux.mkv"), "Remux");
        assert_eq!(quality_tag("movie.2023.bluray.x265.mkv"), "BluRay");
        assert_eq!(quality_tag("show.s01e01.web-dl.mkv"), "WEB-DL");
        assert_eq!(quality_tag("show.s01e01.webrip.mkv"), "WEBrip");
        assert_eq!(quality_tag("plain.mkv"), "未知");
    }

    #[test]
    fn effect_tag_prefers_filename_over_stream() {
        assert_eq!(effect_tag("movie.dovi.hdr.mkv", None), "dovi_p8");
        assert_eq!(effect_tag("movie.dovi.p5.mkv", None), "dovi_p5");
        assert_eq!(effect_tag("movie.dovi.mkv", None), "dovi_other");
        assert_eq!(effect_tag("movie.hdr10+.mkv", None), "hdr10+");
        assert_eq!(effect_tag("movie.hdr.mkv", None), "hdr");

        let mut stream = video_stream(3840);
        stream.video_range = Some("dvhe.08 HDR".to_string());
        assert_eq!(effect_tag("plain.mkv", Some(&stream)), "dovi_p8");
        assert_eq!(effect_tag("plain.mkv", None), "sdr");
    }

    #[test]
    fn release_group_matches_alias_regex() {
        assert_eq!(
            release_groups_for("Movie.2023.1080p.BluRay.x265-FRDS.mkv"),
            vec!["朋友".to_string()]
        );
        assert_eq!(
            release_groups_for("[LoliHouse] Show - 05 [WebRip].mkv"),
            vec!["anime".to_string()]
        );
        assert!(release_groups_for("Spirited.Away.2001.mkv").is_empty());
    }

    #[test]
    fn full_parse_uses_stream_width_first() {
        let item = EmbyItem {
            id: "e1".to_string(),
            path: Some("/media/Movie.2023.720p.WEB-DL.mkv".to_string()),
            media_streams: Some(vec![video_stream(3840)]),
            ..EmbyItem::default()
        };
        let details = parse_asset_details(&item);
        assert_eq!(details.resolution_display, "4k");
        assert_eq!(details.quality_display, "WEB-DL");
        assert_eq!(details.codec_display, "HEVC");
        assert_eq!(details.emby_item_id.as_deref(), Some("e1"));
    }
}
