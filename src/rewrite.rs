use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{ByteOrder, NativeEndian};
use log::info;

use crate::error::Error;
use crate::pseudonym::{MappingStore, PseudonymTable};
use crate::random::RandomSource;
use crate::tokens::*;

/// An id interval. Eligibility for rewriting is inclusive on both ends;
/// freshly allocated pseudonyms land in `[min, max)`. A field holding
/// exactly `max` is rewritten, but never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

/// Which rewrite classes are active and with what parameters. A `None`
/// means the class is disabled and the corresponding fields pass through
/// untouched.
pub struct RewriteConfig {
    pub uids: Option<IdRange>,
    pub gids: Option<IdRange>,
    pub pids: Option<IdRange>,
    pub path_prefixes: Option<Vec<Vec<u8>>>,
    pub addrs: bool,
    pub exec_args: bool,
    pub time_shift_max: Option<u32>,
}

impl RewriteConfig {
    /// Everything off; the pipeline degenerates to a byte-exact copy.
    #[cfg(test)]
    pub fn disabled() -> Self {
        RewriteConfig {
            uids: None,
            gids: None,
            pids: None,
            path_prefixes: None,
            addrs: false,
            exec_args: false,
            time_shift_max: None,
        }
    }
}

/// Applies the enabled rewrite classes to one token held in a scratch
/// buffer. All edits happen in place; a token never changes size.
pub struct Rewriter {
    config: RewriteConfig,
    maps: MappingStore,
    random: RandomSource,
    time_delta: u32,
}

impl Rewriter {
    pub fn new(config: RewriteConfig, mut random: RandomSource) -> Self {
        // The shift is drawn once and applied to every timestamp, so the
        // relative timing of events survives pseudonymization.
        let time_delta = match config.time_shift_max {
            Some(max) if max > 0 => random.time_shift(max),
            _ => 0,
        };
        Rewriter {
            config,
            maps: MappingStore::new(),
            random,
            time_delta,
        }
    }

    pub fn time_delta(&self) -> u32 {
        self.time_delta
    }

    pub fn rewrite_token(&mut self, token: &mut [u8]) -> Result<(), Error> {
        if token.is_empty() {
            return Ok(());
        }
        if self.config.uids.is_some() || self.config.gids.is_some() || self.config.pids.is_some() {
            self.rewrite_ids(token);
        }
        if self.config.addrs {
            self.rewrite_addrs(token)?;
        }
        if self.config.path_prefixes.is_some() {
            self.rewrite_paths(token);
        }
        if self.config.time_shift_max.is_some() {
            self.rewrite_times(token)?;
        }
        if self.config.exec_args {
            self.scrub_exec(token);
        }
        Ok(())
    }

    /// User, group and process ids. Subject and process tokens lay their
    /// ids out as audit-id, effective uid, effective gid, real uid, real
    /// gid, pid; the audit id is usually a uid, so it gets the uid
    /// treatment too.
    fn rewrite_ids(&mut self, token: &mut [u8]) {
        match token[0] {
            AUT_SUBJECT32 | AUT_SUBJECT64 | AUT_PROCESS32 | AUT_PROCESS64 | AUT_SUBJECT32_EX
            | AUT_SUBJECT64_EX | AUT_PROCESS32_EX | AUT_PROCESS64_EX => {
                self.map_uid(token, 1);
                self.map_uid(token, 5);
                self.map_gid(token, 9);
                self.map_uid(token, 13);
                self.map_gid(token, 17);
                self.map_pid(token, 21);
            }
            // File attributes: mode, owner uid, owner gid.
            AUT_ATTR32 | AUT_ATTR64 => {
                self.map_uid(token, 5);
                self.map_gid(token, 9);
            }
            // IPC permissions: euid, egid, uid, gid.
            AUT_IPC_PERM => {
                self.map_uid(token, 1);
                self.map_gid(token, 5);
                self.map_uid(token, 9);
                self.map_gid(token, 13);
            }
            _ => {}
        }
    }

    fn map_uid(&mut self, token: &mut [u8], offset: usize) {
        if let Some(range) = self.config.uids {
            map_id(
                &mut self.maps.uids,
                &mut self.random,
                range,
                "uid",
                &mut token[offset..offset + 4],
            );
        }
    }

    fn map_gid(&mut self, token: &mut [u8], offset: usize) {
        if let Some(range) = self.config.gids {
            map_id(
                &mut self.maps.gids,
                &mut self.random,
                range,
                "gid",
                &mut token[offset..offset + 4],
            );
        }
    }

    fn map_pid(&mut self, token: &mut [u8], offset: usize) {
        if let Some(range) = self.config.pids {
            map_id(
                &mut self.maps.pids,
                &mut self.random,
                range,
                "pid",
                &mut token[offset..offset + 4],
            );
        }
    }

    /// IPv4/IPv6 addresses. The ip token is deliberately left alone; the
    /// extended header/subject/process variants carry addresses this
    /// rewriter has no offset tables for, and silently passing them
    /// through would leak, so they are rejected instead.
    fn rewrite_addrs(&mut self, token: &mut [u8]) -> Result<(), Error> {
        match token[0] {
            AUT_HEADER32_EX | AUT_HEADER64_EX => {
                return Err(Error::UnsupportedToken("extended header"))
            }
            AUT_PROCESS32_EX | AUT_SUBJECT32_EX => {
                return Err(Error::UnsupportedToken("extended subject/process (32-bit)"))
            }
            AUT_PROCESS64_EX | AUT_SUBJECT64_EX => {
                return Err(Error::UnsupportedToken("extended subject/process (64-bit)"))
            }
            AUT_IP => {}
            AUT_PROCESS32 | AUT_SUBJECT32 => self.map_addr(token, 33, 4),
            AUT_PROCESS64 | AUT_SUBJECT64 => self.map_addr(token, 37, 4),
            AUT_SOCKET => self.map_addr(token, 5, 4),
            AUT_SOCKET_EX => {
                // The remote and local addresses sit back to back; their
                // width comes from the byte at offset 7.
                let len = token[7] as usize;
                self.map_addr(token, 9, len);
                self.map_addr(token, 9 + len, len);
            }
            _ => {}
        }
        Ok(())
    }

    fn map_addr(&mut self, token: &mut [u8], offset: usize, len: usize) {
        let Some(field) = token.get_mut(offset..offset + len) else {
            return;
        };
        // All zeroes means "unspecified / local host"; substituting it
        // would invent traffic that never happened.
        if field.iter().all(|&b| b == 0) {
            return;
        }
        let before = self.maps.addrs.len();
        let random = &mut self.random;
        let (pseudo, fresh) = self.maps.addrs.lookup_or_insert(field, || {
            let mut bytes = vec![0u8; len];
            random.address(&mut bytes);
            bytes
        });
        if fresh {
            info!(
                "[map] addr {} -> {} ({} mapped)",
                format_addr(field),
                format_addr(pseudo),
                before + 1
            );
        }
        field.copy_from_slice(pseudo);
    }

    fn rewrite_paths(&mut self, token: &mut [u8]) {
        match token[0] {
            AUT_PATH | AUT_TEXT => self.map_path(token),
            _ => {}
        }
    }

    /// Pathname pseudonymization. The matched prefix is kept verbatim and
    /// only the remainder is replaced, so a reader can still tell a home
    /// directory from a spool file; the replacement has exactly the
    /// original length, keeping the token layout intact.
    fn map_path(&mut self, token: &mut [u8]) {
        let Some(prefixes) = &self.config.path_prefixes else {
            return;
        };
        let region = &mut token[3..];

        // A leading run of slashes counts as one: "//export/home" is the
        // same path as "/export/home". Extra slashes stay where they are
        // and only the canonical tail is matched and replaced.
        let mut start = 0;
        while region.len() - start >= 2 && region[start] == b'/' && region[start + 1] == b'/' {
            start += 1;
        }

        let Some(nul) = memchr::memchr(0, &region[start..]) else {
            return;
        };
        let path_len = nul;
        let path = &region[start..start + path_len];
        let Some(prefix) = prefixes.iter().find(|p| path.starts_with(p.as_slice())) else {
            return;
        };
        let prefix_len = prefix.len();

        // The table key includes the terminator, so "/tmp/a" and a
        // hypothetical "/tmp/a<garbage>" of equal length stay distinct.
        let key = region[start..start + path_len + 1].to_vec();
        let before = self.maps.paths.len();
        let random = &mut self.random;
        let (pseudo, fresh) = self.maps.paths.lookup_or_insert(&key, || {
            let mut bytes = key.clone();
            random.path_suffix(&mut bytes[prefix_len..path_len]);
            bytes
        });
        if fresh {
            info!(
                "[map] path {} -> {} ({} mapped)",
                String::from_utf8_lossy(&key[..path_len]),
                String::from_utf8_lossy(&pseudo[..path_len]),
                before + 1
            );
        }
        region[start..start + path_len + 1].copy_from_slice(pseudo);
    }

    /// Timestamps. Only the 32-bit seconds field moves; microseconds are
    /// jitter, not identity.
    fn rewrite_times(&mut self, token: &mut [u8]) -> Result<(), Error> {
        match token[0] {
            AUT_OTHER_FILE32 | AUT_OTHER_FILE64 => self.shift_time(token, 1),
            AUT_HEADER32 => self.shift_time(token, 10),
            AUT_HEADER64 => self.shift_time(token, 14),
            AUT_HEADER32_EX => return Err(Error::UnsupportedToken("extended header (32-bit)")),
            AUT_HEADER64_EX => return Err(Error::UnsupportedToken("extended header (64-bit)")),
            _ => {}
        }
        Ok(())
    }

    fn shift_time(&mut self, token: &mut [u8], offset: usize) {
        let field = &mut token[offset..offset + 4];
        let seconds = NativeEndian::read_u32(field);
        NativeEndian::write_u32(field, seconds.wrapping_sub(self.time_delta));
    }

    /// Exec arguments and environment. Every non-NUL byte of the counted
    /// strings becomes a space; the terminators stay put, so the token
    /// keeps its exact layout while command lines and environment values
    /// disappear.
    fn scrub_exec(&mut self, token: &mut [u8]) {
        match token[0] {
            AUT_EXEC_ARGS | AUT_EXEC_ENV => {}
            _ => return,
        }
        let count = NativeEndian::read_u32(&token[1..5]);
        let strings = &mut token[5..];
        let mut j = 0;
        for _ in 0..count {
            while j < strings.len() && strings[j] != 0 {
                strings[j] = b' ';
                j += 1;
            }
            j += 1;
            if j > strings.len() {
                break;
            }
        }
    }
}

fn map_id(
    table: &mut PseudonymTable,
    random: &mut RandomSource,
    range: IdRange,
    label: &str,
    field: &mut [u8],
) {
    let value = NativeEndian::read_u32(field);
    if value < range.min || value > range.max {
        return;
    }
    let before = table.len();
    let (pseudo, fresh) = table.lookup_or_insert(field, || {
        let mut bytes = vec![0u8; 4];
        NativeEndian::write_u32(&mut bytes, random.id_in_range(range.min, range.max));
        bytes
    });
    if fresh {
        info!(
            "[map] {label} {value} -> {} ({} mapped)",
            NativeEndian::read_u32(pseudo),
            before + 1
        );
    }
    field.copy_from_slice(pseudo);
}

fn format_addr(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string(),
        16 => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(bytes);
            Ipv6Addr::from(raw).to_string()
        }
        _ => bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    }
}
