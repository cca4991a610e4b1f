//! Name synthesis for duplicates, links, new items and filesystems with
//! restricted character sets.

use std::ffi::{OsStr, OsString};

const COPY_TAG: &str = " (copy)";
const ANOTHER_COPY_TAG: &str = " (another copy)";
const ORDINAL_TAGS: [&str; 7] = [
    "11th copy)",
    "12th copy)",
    "13th copy)",
    "st copy)",
    "nd copy)",
    "rd copy)",
    "th copy)",
];
const MAX_DUPLICATE_COUNT: u64 = 1_000_000;
const FAT_FORBIDDEN: &[char] = &['/', ':', ';', '*', '?', '"', '<', '>'];

/// Longest name shown in dialogs before middle truncation.
pub const MAX_DISPLAYED_NAME_LENGTH: usize = 50;

/// Byte offset of the extension of `name`, including the dot.
///
/// Compressed tarball extensions such as `.tar.gz` are treated as one.
pub fn extension_offset(name: &str) -> Option<usize> {
    dot_offset(name).filter(|&end| end != 0)
}

// Like `extension_offset`, but a dot at the very start counts.
fn dot_offset(name: &str) -> Option<usize> {
    let end = name.rfind('.')?;
    if end == 0 {
        return Some(0);
    }
    let ext = &name[end..];
    if matches!(ext, ".gz" | ".bz2" | ".sit" | ".Z") {
        if let Some(prev) = name[..end].rfind('.') {
            if prev != 0 {
                return Some(prev);
            }
        }
    }
    Some(end)
}

// A tag placed after the extension start means there is no extension,
// as in "foo. (copy)".
fn void_suffix_after(suffix: &mut Option<usize>, tag: usize) {
    if suffix.is_some_and(|s| tag > s) {
        *suffix = None;
    }
}

/// Split `name` into its duplicate base, its extension and the copy count
/// its tag denotes.
fn parse_duplicate(name: &str) -> (&str, &str, u64) {
    // The first character never starts an extension, whatever its width.
    let mut suffix = name
        .char_indices()
        .nth(1)
        .and_then(|(start, _)| dot_offset(&name[start..]).map(|offset| offset + start))
        .filter(|&offset| offset + 1 < name.len());

    if let Some(tag) = name.find(COPY_TAG) {
        void_suffix_after(&mut suffix, tag);
        return (&name[..tag], suffix.map_or("", |s| &name[s..]), 1);
    }
    if let Some(tag) = name.find(ANOTHER_COPY_TAG) {
        void_suffix_after(&mut suffix, tag);
        return (&name[..tag], suffix.map_or("", |s| &name[s..]), 2);
    }

    if ORDINAL_TAGS.iter().any(|tag| name.contains(tag)) {
        if let Some(tag) = name.find(" (") {
            void_suffix_after(&mut suffix, tag);
            let digits: String = name[tag + 2..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            let count = digits
                .parse::<u64>()
                .ok()
                .filter(|count| (1..=MAX_DUPLICATE_COUNT).contains(count))
                .unwrap_or(0);
            return (&name[..tag], suffix.map_or("", |s| &name[s..]), count);
        }
    }

    match suffix {
        Some(s) => (&name[..s], &name[s..], 0),
        None => (name, "", 0),
    }
}

fn ordinal(count: u64) -> &'static str {
    match count % 100 {
        11..=13 => "th",
        _ => match count % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    }
}

fn format_duplicate(base: &str, suffix: &str, count: u64) -> String {
    match count {
        0 | 1 => format!("{base}{COPY_TAG}{suffix}"),
        2 => format!("{base}{ANOTHER_COPY_TAG}{suffix}"),
        n => format!("{base} ({n}{} copy){suffix}", ordinal(n)),
    }
}

/// Drop `reduce_by` bytes from the end of `base`, never splitting a
/// character. Returns None when nothing would be left.
pub fn shorten_utf8(base: &str, reduce_by: usize) -> Option<&str> {
    let keep = base.len().checked_sub(reduce_by).filter(|&n| n > 0)?;
    let mut end = 0;
    for (idx, c) in base.char_indices() {
        if idx + c.len_utf8() > keep {
            break;
        }
        end = idx + c.len_utf8();
    }
    (end > 0).then(|| &base[..end])
}

fn fit(max_length: Option<usize>, base: &str, render: impl Fn(&str) -> String) -> String {
    let name = render(base);
    if let Some(max) = max_length.filter(|&max| max > 0) {
        if name.len() > max {
            if let Some(short) = shorten_utf8(base, name.len() - max) {
                return render(short);
            }
        }
    }
    name
}

/// Name for the next duplicate of `name`, `increment` copies further.
///
/// `"foo.txt"` becomes `"foo (copy).txt"`, then `"foo (another copy).txt"`,
/// then `"foo (3rd copy).txt"` and so on.
pub fn duplicate_name(name: &str, increment: u64, max_length: Option<usize>) -> String {
    if name.is_empty() {
        return format_duplicate("", "", increment.max(1));
    }
    let (base, suffix, count) = parse_duplicate(name);
    let count = (count + increment).max(1);
    fit(max_length, base, |b| format_duplicate(b, suffix, count))
}

/// Duplicate name for a file name that is not valid UTF-8.
pub fn duplicate_name_raw(name: &OsStr, increment: u64) -> OsString {
    let bytes = name.as_encoded_bytes();
    let mut count = increment;
    if let Some(dot) = bytes.iter().rposition(|&b| b == b'.') {
        let digits: String = bytes[dot + 1..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .map(|&b| b as char)
            .collect();
        count += digits.parse::<u64>().unwrap_or(0);
    }
    let mut out = name.to_os_string();
    out.push(format!(".{count}"));
    out
}

/// Name of the `count`th link to `name`.
pub fn link_name(name: &str, count: u32, max_length: Option<usize>) -> String {
    let render = |base: &str| match count {
        0 => base.to_string(),
        1 => format!("Link to {base}"),
        2 => format!("Another link to {base}"),
        n => format!("{n}{} link to {base}", ordinal(n as u64)),
    };
    fit(max_length, name, render)
}

/// Link name for a file name that is not valid UTF-8.
pub fn link_name_raw(name: &OsStr, count: u32) -> OsString {
    let mut out = name.to_os_string();
    if count <= 1 {
        out.push(".lnk");
    } else {
        out.push(format!(".lnk{count}"));
    }
    out
}

/// Rewrite `name` so the filesystem type `fs_type` accepts it.
///
/// Returns None when no change was needed.
pub fn valid_for_fs(name: &str, fs_type: &str) -> Option<String> {
    if !matches!(fs_type, "fat" | "vfat" | "msdos" | "msdosfs") {
        return None;
    }
    let mut fixed: String = name
        .chars()
        .map(|c| if FAT_FORBIDDEN.contains(&c) { '_' } else { c })
        .collect();
    if fixed.chars().any(|c| c != ' ') {
        fixed.truncate(fixed.trim_end().len());
    }
    (fixed != name).then_some(fixed)
}

/// Apply [`valid_for_fs`] when a filesystem type is known.
pub fn for_fs(name: OsString, fs_type: Option<&str>) -> OsString {
    let fixed = fs_type
        .zip(name.to_str())
        .and_then(|(fs, utf8)| valid_for_fs(utf8, fs));
    fixed.map_or(name, OsString::from)
}

/// Name of the `count`th new item based on `name`, for `count >= 2`
/// `"Untitled Folder 2"`, `"notes 3.txt"`.
pub fn numbered_name(name: &str, count: u32) -> String {
    if count < 2 {
        return name.to_string();
    }
    match extension_offset(name) {
        Some(offset) => format!("{} {count}{}", &name[..offset], &name[offset..]),
        None => format!("{name} {count}"),
    }
}

/// Shorten `name` for dialogs by cutting its middle.
pub fn truncate_middle(name: &str, max_chars: usize) -> String {
    let len = name.chars().count();
    if len <= max_chars || max_chars < 4 {
        return name.to_string();
    }
    let keep = max_chars - 3;
    let head = keep.div_ceil(2);
    let tail = keep - head;
    let start: String = name.chars().take(head).collect();
    let end: String = name.chars().skip(len - tail).collect();
    format!("{start}...{end}")
}

/// Display form of a path's file name for dialog texts.
pub fn display_name(path: &std::path::Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    truncate_middle(&name, MAX_DISPLAYED_NAME_LENGTH)
}
