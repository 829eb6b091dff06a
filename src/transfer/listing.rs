//! Module `listing`
//!
//! Formats the `ls -l` style lines a LIST command sends over the data
//! connection: permission string, link count, owner, group, size,
//! modification time and name.

use std::ffi::OsStr;
use std::fs::Metadata;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use chrono::{DateTime, Local};
use nix::unistd::{Gid, Group, Uid, User};

const PERMISSION_BITS: [(u32, char); 9] = [
    (0o400, 'r'),
    (0o200, 'w'),
    (0o100, 'x'),
    (0o040, 'r'),
    (0o020, 'w'),
    (0o010, 'x'),
    (0o004, 'r'),
    (0o002, 'w'),
    (0o001, 'x'),
];

/// Ten-character type + rwx string, `-` for unset bits and unknown types.
pub fn permission_string(metadata: &Metadata) -> String {
    let file_type = metadata.file_type();
    let type_char = if file_type.is_dir() {
        'd'
    } else if file_type.is_symlink() {
        'l'
    } else if file_type.is_block_device() {
        'b'
    } else if file_type.is_char_device() {
        'c'
    } else if file_type.is_fifo() {
        'p'
    } else if file_type.is_socket() {
        's'
    } else {
        '-'
    };

    let mode = metadata.mode();
    std::iter::once(type_char)
        .chain(
            PERMISSION_BITS
                .iter()
                .map(|&(bit, c)| if mode & bit != 0 { c } else { '-' }),
        )
        .collect()
}

/// User name for `uid`, or the numeric id when it cannot be resolved.
pub fn owner_name(uid: u32) -> String {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

/// Group name for `gid`, or the numeric id when it cannot be resolved.
pub fn group_name(gid: u32) -> String {
    match Group::from_gid(Gid::from_raw(gid)) {
        Ok(Some(group)) => group.name,
        _ => gid.to_string(),
    }
}

/// Twelve characters of modification time in local time, e.g. `Jun  3 21:49`.
pub fn modified_text(metadata: &Metadata) -> String {
    let modified: DateTime<Local> = match metadata.modified() {
        Ok(time) => time.into(),
        Err(_) => DateTime::from_timestamp(metadata.mtime(), 0)
            .unwrap_or_default()
            .with_timezone(&Local),
    };
    modified.format("%b %e %H:%M").to_string()
}

/// One CRLF-terminated listing line for `name`. The name goes out with
/// its on-disk bytes.
pub fn format_entry(name: &OsStr, metadata: &Metadata) -> Vec<u8> {
    let mut line = format!(
        "{} {:>4} {:<8} {:<8} {:>8} {} ",
        permission_string(metadata),
        metadata.nlink(),
        owner_name(metadata.uid()),
        group_name(metadata.gid()),
        metadata.size(),
        modified_text(metadata),
    )
    .into_bytes();
    line.extend_from_slice(name.as_bytes());
    line.extend_from_slice(b"\r\n");
    line
}
