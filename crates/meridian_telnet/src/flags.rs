//! The negotiated capability map for one connection.
//!
//! Every session carries these flags whether or not the client answered
//! anything; the defaults describe a dumb 80x24 terminal. The gateway
//! serializes the map into the session record so the logic process can
//! consult it when formatting output.

use crate::codes::mtts;
use serde_json::{json, Map, Value};

/// Negotiated client capabilities with conservative defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolFlags {
    /// Reported terminal type name, lowercased. "unknown" when the
    /// client never answered TTYPE.
    pub ttype: String,
    /// Client class from the second TTYPE reply, if any.
    pub client_name: String,
    pub screen_width: u16,
    pub screen_height: u16,
    pub ansi: bool,
    pub xterm256: bool,
    pub truecolor: bool,
    pub utf8: bool,
    pub screen_reader: bool,
    /// Outgoing zlib compression active.
    pub compress: bool,
    pub mxp: bool,
    pub gmcp: bool,
    pub msdp: bool,
    pub mssp: bool,
    /// Negotiation ended by the hard timeout rather than completing.
    pub forced: bool,
}

impl Default for ProtocolFlags {
    fn default() -> Self {
        Self {
            ttype: "unknown".into(),
            client_name: String::new(),
            screen_width: 80,
            screen_height: 24,
            ansi: false,
            xterm256: false,
            truecolor: false,
            utf8: false,
            screen_reader: false,
            compress: false,
            mxp: false,
            gmcp: false,
            msdp: false,
            mssp: false,
            forced: false,
        }
    }
}

impl ProtocolFlags {
    /// Folds an MTTS capability bitmask (third TTYPE reply) into the
    /// flags. Bits only ever enable capabilities.
    pub fn apply_mtts(&mut self, bitmask: u16) {
        if bitmask & mtts::ANSI != 0 {
            self.ansi = true;
        }
        if bitmask & mtts::UTF8 != 0 {
            self.utf8 = true;
        }
        if bitmask & mtts::COLORS_256 != 0 {
            self.xterm256 = true;
            self.ansi = true;
        }
        if bitmask & mtts::TRUECOLOR != 0 {
            self.truecolor = true;
            self.xterm256 = true;
            self.ansi = true;
        }
        if bitmask & mtts::SCREEN_READER != 0 {
            self.screen_reader = true;
        }
    }

    /// Heuristic capability detection from a terminal type name, for
    /// clients that answer TTYPE but not MTTS.
    pub fn apply_ttype_name(&mut self, name: &str) {
        let lowered = name.to_lowercase();
        if lowered.contains("xterm") || lowered.contains("256") {
            self.xterm256 = true;
            self.ansi = true;
        }
        if lowered.contains("ansi")
            || lowered.contains("vt100")
            || lowered.contains("mudlet")
            || lowered.contains("tintin")
        {
            self.ansi = true;
        }
        if lowered.contains("truecolor") {
            self.truecolor = true;
            self.xterm256 = true;
            self.ansi = true;
        }
        self.ttype = lowered;
    }

    /// Flattens the flags into the JSON map stored on the session
    /// record.
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("ttype".into(), json!(self.ttype));
        map.insert("client_name".into(), json!(self.client_name));
        map.insert("screen_width".into(), json!(self.screen_width));
        map.insert("screen_height".into(), json!(self.screen_height));
        map.insert("ansi".into(), json!(self.ansi));
        map.insert("xterm256".into(), json!(self.xterm256));
        map.insert("truecolor".into(), json!(self.truecolor));
        map.insert("utf8".into(), json!(self.utf8));
        map.insert("screen_reader".into(), json!(self.screen_reader));
        map.insert("compress".into(), json!(self.compress));
        map.insert("mxp".into(), json!(self.mxp));
        map.insert("gmcp".into(), json!(self.gmcp));
        map.insert("msdp".into(), json!(self.msdp));
        map.insert("mssp".into(), json!(self.mssp));
        map.insert("forced".into(), json!(self.forced));
        map
    }
}
