//! Static DMAP tag dictionary
//!
//! Each known tag maps to a value kind; the codec needs the kind to
//! interpret payload bytes. The table is immutable and built once at
//! first use.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Interpretation of a tag's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Nested tag stream
    Container,
    /// Unsigned big-endian integer, 1 byte
    U8,
    /// Unsigned big-endian integer, 2 bytes
    U16,
    /// Unsigned big-endian integer, 4 bytes
    U32,
    /// Unsigned big-endian integer, 8 bytes
    U64,
    /// UTF-8 string
    Str,
    /// Single-byte boolean
    Bool,
    /// Opaque bytes
    Raw,
    /// Known but deliberately skipped
    Ignore,
}

/// One dictionary entry.
#[derive(Debug, Clone, Copy)]
pub struct TagDef {
    /// Value kind
    pub kind: TagKind,
    /// Human-readable name for logs
    pub name: &'static str,
}

macro_rules! tag_table {
    ($(($tag:literal, $kind:ident, $name:literal)),* $(,)?) => {
        {
            let mut table: HashMap<[u8; 4], TagDef> = HashMap::new();
            $(
                table.insert(*$tag, TagDef { kind: TagKind::$kind, name: $name });
            )*
            table
        }
    };
}

/// The process-wide tag dictionary.
pub static TAGS: LazyLock<HashMap<[u8; 4], TagDef>> = LazyLock::new(|| {
    tag_table![
        // Generic DMAP
        (b"mlog", Container, "dmap.loginresponse"),
        (b"mlid", U32, "dmap.sessionid"),
        (b"mstt", U32, "dmap.status"),
        (b"miid", U32, "dmap.itemid"),
        (b"minm", Str, "dmap.itemname"),
        (b"mper", U64, "dmap.persistentid"),
        (b"mpro", U32, "dmap.protocolversion"),
        (b"mdcl", Container, "dmap.dictionary"),
        (b"mlit", Container, "dmap.listingitem"),
        (b"msrv", Container, "dmap.serverinforesponse"),
        (b"muty", U8, "dmap.updatetype"),
        (b"mpco", U32, "dmap.parentcontainerid"),
        // Control / play status
        (b"cmst", Container, "dmcp.playstatus"),
        (b"cmsr", U32, "dmcp.serverrevision"),
        (b"caps", U8, "dacp.playerstate"),
        (b"cash", U8, "dacp.shufflestate"),
        (b"carp", U8, "dacp.repeatstate"),
        (b"cann", Str, "daap.nowplayingtrack"),
        (b"cana", Str, "daap.nowplayingartist"),
        (b"canl", Str, "daap.nowplayingalbum"),
        (b"cang", Str, "daap.nowplayinggenre"),
        (b"cast", U32, "dacp.tracklength"),
        (b"cant", U32, "dacp.remainingtime"),
        (b"cmmk", U32, "dmcp.mediakind"),
        (b"cavc", Bool, "dmcp.volumecontrollable"),
        (b"casp", Bool, "dacp.speakers"),
        (b"cmvo", U32, "dmcp.volume"),
        // DAAP song metadata (also pushed over RAOP SET_PARAMETER)
        (b"asar", Str, "daap.songartist"),
        (b"asal", Str, "daap.songalbum"),
        (b"asgn", Str, "daap.songgenre"),
        (b"astm", U32, "daap.songtime"),
        // Pairing
        (b"cmpa", Container, "dacp.pairinganswer"),
        (b"cmpg", U64, "dacp.pairingguid"),
        (b"cmnm", Str, "dacp.devicename"),
        (b"cmty", Str, "dacp.devicetype"),
        // Server info / ignored noise
        (b"mslr", Bool, "dmap.loginrequired"),
        (b"msal", Bool, "dmap.supportsautologout"),
        (b"aeSV", U32, "com.apple.itunes.music-sharing-version"),
        (b"aeFP", U8, "com.apple.itunes.req-fplay"),
        (b"ated", U16, "daap.supportsextradata"),
        (b"asgr", U16, "daap.supportsgroups"),
        (b"mstm", U32, "dmap.timeoutinterval"),
        (b"musr", U32, "dmap.serverrevision"),
        (b"mstc", Ignore, "dmap.utctime"),
        (b"msto", Ignore, "dmap.utcoffset"),
    ]
});

/// Look up a tag definition.
#[must_use]
pub fn lookup(tag: &[u8; 4]) -> Option<&'static TagDef> {
    TAGS.get(tag)
}
