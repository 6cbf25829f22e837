//! The handshake driver.
//!
//! On connect the gateway fires its full option roster at the client and
//! counts outstanding answers. Each option resolves exactly once; when
//! the count reaches zero - or the owning pump's hard timeout fires -
//! the handshake is over and the session registers with the logic
//! process carrying whatever flags were gathered. Options that produce
//! data after the handshake (NAWS resizes, GMCP, MSDP) keep feeding the
//! out-of-band queue.
//!
//! The negotiator does no socket work itself: the pump feeds it parsed
//! events, drains `take_output` onto the wire, and arms
//! [`NEGOTIATION_TIMEOUT`].

use crate::codes::option_name;
use crate::flags::ProtocolFlags;
use crate::options::{refuse, standard_handlers, OptionHandler, ServerStatus};
use std::time::Duration;
use tracing::{debug, trace};

pub use crate::options::OobUpdate;

/// Hard cap on how long a client may stall the handshake.
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Sans-io telnet handshake state for one connection.
pub struct Negotiator {
    handlers: Vec<Box<dyn OptionHandler>>,
    flags: ProtocolFlags,
    output: Vec<u8>,
    oob: Vec<OobUpdate>,
    started: bool,
    completion_reported: bool,
    forced: bool,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::with_status(ServerStatus::default())
    }

    /// Builds a negotiator that answers MSSP queries with the given
    /// server status.
    pub fn with_status(status: ServerStatus) -> Self {
        Self {
            handlers: standard_handlers(status),
            flags: ProtocolFlags::default(),
            output: Vec::new(),
            oob: Vec::new(),
            started: false,
            completion_reported: false,
            forced: false,
        }
    }

    /// Queues the opening offers. Idempotent.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for handler in &mut self.handlers {
            handler.start(&mut self.output);
        }
        trace!(options = self.handlers.len(), "negotiation offers queued");
    }

    /// Handles a `WILL`/`WONT`/`DO`/`DONT` answer from the client.
    pub fn handle_negotiation(&mut self, verb: u8, option: u8) {
        let Some(handler) = self.handlers.iter_mut().find(|h| h.option() == option) else {
            if let Some(reply) = refuse(verb, option) {
                self.output.extend_from_slice(&reply);
            }
            return;
        };
        let was_done = handler.is_done();
        handler.on_negotiate(verb, &mut self.flags, &mut self.output);
        if !was_done && handler.is_done() {
            debug!(option = option_name(option), "option resolved");
        }
    }

    /// Handles a subnegotiation payload from the client.
    pub fn handle_subnegotiation(&mut self, option: u8, payload: &[u8]) {
        let Some(handler) = self.handlers.iter_mut().find(|h| h.option() == option) else {
            debug!(option = option_name(option), "subnegotiation for unoffered option, ignoring");
            return;
        };
        let was_done = handler.is_done();
        handler.on_subnegotiate(payload, &mut self.flags, &mut self.output, &mut self.oob);
        if !was_done && handler.is_done() {
            debug!(option = option_name(option), "option resolved");
        }
    }

    /// Ends the handshake regardless of outstanding options. Called by
    /// the pump when [`NEGOTIATION_TIMEOUT`] fires.
    pub fn force_complete(&mut self) {
        if !self.is_complete() {
            self.forced = true;
            self.flags.forced = true;
        }
    }

    /// True once every option has resolved or the handshake was forced.
    pub fn is_complete(&self) -> bool {
        self.forced || (self.started && self.handlers.iter().all(|h| h.is_done()))
    }

    /// Returns true exactly once, the first time the handshake is
    /// observed complete. The session registers with the logic process
    /// on that edge.
    pub fn just_completed(&mut self) -> bool {
        if self.completion_reported || !self.is_complete() {
            return false;
        }
        self.completion_reported = true;
        true
    }

    /// Drains the queued reply bytes for the wire.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Drains out-of-band updates gathered since the last call.
    pub fn take_oob(&mut self) -> Vec<OobUpdate> {
        std::mem::take(&mut self.oob)
    }

    pub fn flags(&self) -> &ProtocolFlags {
        &self.flags
    }

    pub fn into_flags(self) -> ProtocolFlags {
        self.flags
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{
        DO, DONT, GMCP, IAC, MCCP2, MSDP, MSSP, MXP, NAWS, SB, SE, TTYPE, TTYPE_IS, WILL, WONT,
    };

    fn drive_full_handshake(neg: &mut Negotiator) {
        neg.start();
        neg.handle_negotiation(WILL, NAWS);
        neg.handle_negotiation(WILL, TTYPE);
        let mut reply = vec![TTYPE_IS];
        reply.extend_from_slice(b"xterm-256color");
        neg.handle_subnegotiation(TTYPE, &reply);
        let mut reply = vec![TTYPE_IS];
        reply.extend_from_slice(b"mudlet");
        neg.handle_subnegotiation(TTYPE, &reply);
        let mut reply = vec![TTYPE_IS];
        reply.extend_from_slice(b"MTTS 269");
        neg.handle_subnegotiation(TTYPE, &reply);
        neg.handle_negotiation(DO, MCCP2);
        neg.handle_negotiation(DO, MSSP);
        neg.handle_negotiation(DO, MXP);
        neg.handle_negotiation(DO, MSDP);
        neg.handle_negotiation(DO, GMCP);
    }

    #[test]
    fn test_full_handshake_completes_with_flags() {
        let mut neg = Negotiator::new();
        drive_full_handshake(&mut neg);

        assert!(neg.is_complete());
        let flags = neg.flags();
        assert_eq!(flags.ttype, "xterm-256color");
        assert_eq!(flags.client_name, "mudlet");
        // MTTS 269 = ANSI | UTF8 | 256 COLORS | TRUECOLOR.
        assert!(flags.ansi && flags.utf8 && flags.xterm256 && flags.truecolor);
        assert!(flags.compress && flags.mssp && flags.mxp && flags.msdp && flags.gmcp);
        assert!(!flags.forced);
    }

    #[test]
    fn test_completion_edge_fires_once() {
        let mut neg = Negotiator::new();
        neg.start();
        assert!(!neg.just_completed());
        drive_full_handshake(&mut neg);
        assert!(neg.just_completed());
        assert!(!neg.just_completed());
    }

    #[test]
    fn test_refusing_client_completes_with_defaults() {
        let mut neg = Negotiator::new();
        neg.start();
        neg.handle_negotiation(WONT, NAWS);
        neg.handle_negotiation(WONT, TTYPE);
        neg.handle_negotiation(DONT, MCCP2);
        neg.handle_negotiation(DONT, MSSP);
        neg.handle_negotiation(DONT, MXP);
        neg.handle_negotiation(DONT, MSDP);
        neg.handle_negotiation(DONT, GMCP);

        assert!(neg.is_complete());
        let flags = neg.flags();
        assert_eq!(flags.screen_width, 80);
        assert!(!flags.ansi && !flags.compress && !flags.gmcp);
        assert!(!flags.forced);
    }

    #[test]
    fn test_silent_client_is_forced_to_defaults() {
        let mut neg = Negotiator::new();
        neg.start();
        assert!(!neg.is_complete());

        neg.force_complete();
        assert!(neg.is_complete());
        assert!(neg.just_completed());
        assert!(neg.flags().forced);
        assert_eq!(neg.flags().ttype, "unknown");
    }

    #[test]
    fn test_force_after_completion_does_not_mark_forced() {
        let mut neg = Negotiator::new();
        drive_full_handshake(&mut neg);
        neg.force_complete();
        assert!(!neg.flags().forced);
    }

    #[test]
    fn test_opening_offers_cover_roster() {
        let mut neg = Negotiator::new();
        neg.start();
        let out = neg.take_output();
        for expect in [
            [IAC, DO, NAWS],
            [IAC, DO, TTYPE],
            [IAC, WILL, MCCP2],
            [IAC, WILL, MSSP],
            [IAC, WILL, MXP],
            [IAC, WILL, MSDP],
            [IAC, WILL, GMCP],
        ] {
            assert!(
                out.windows(3).any(|w| w == expect),
                "missing offer {expect:?}"
            );
        }
        // Drained.
        assert!(neg.take_output().is_empty());
    }

    #[test]
    fn test_mccp2_acceptance_emits_start_marker() {
        let mut neg = Negotiator::new();
        neg.start();
        neg.take_output();
        neg.handle_negotiation(DO, MCCP2);
        let out = neg.take_output();
        assert_eq!(out, vec![IAC, SB, MCCP2, IAC, SE]);
        assert!(neg.flags().compress);
    }

    #[test]
    fn test_unoffered_option_is_refused() {
        let mut neg = Negotiator::new();
        neg.start();
        neg.take_output();
        // ECHO (1) is not on the roster.
        neg.handle_negotiation(WILL, 1);
        assert_eq!(neg.take_output(), vec![IAC, DONT, 1]);
        neg.handle_negotiation(DO, 1);
        assert_eq!(neg.take_output(), vec![IAC, WONT, 1]);
    }

    #[test]
    fn test_naws_resize_surfaces_after_completion() {
        let mut neg = Negotiator::new();
        drive_full_handshake(&mut neg);
        neg.take_oob();

        neg.handle_subnegotiation(NAWS, &[0, 120, 0, 40]);
        assert_eq!(
            neg.take_oob(),
            vec![OobUpdate::Resize {
                width: 120,
                height: 40
            }]
        );
        assert_eq!(neg.flags().screen_width, 120);
        assert_eq!(neg.flags().screen_height, 40);
    }

    #[test]
    fn test_gmcp_message_decoded() {
        let mut neg = Negotiator::new();
        drive_full_handshake(&mut neg);
        neg.take_oob();

        neg.handle_subnegotiation(GMCP, br#"Core.Hello {"client":"mudlet","version":"4.0"}"#);
        let oob = neg.take_oob();
        assert_eq!(oob.len(), 1);
        match &oob[0] {
            OobUpdate::Gmcp { package, data } => {
                assert_eq!(package, "Core.Hello");
                assert_eq!(data["client"], "mudlet");
            }
            other => panic!("unexpected oob {other:?}"),
        }
    }

    #[test]
    fn test_repeated_ttype_reply_ends_cycle() {
        let mut neg = Negotiator::new();
        neg.start();
        neg.handle_negotiation(WILL, TTYPE);
        let mut reply = vec![TTYPE_IS];
        reply.extend_from_slice(b"dumb");
        neg.handle_subnegotiation(TTYPE, &reply);
        neg.handle_subnegotiation(TTYPE, &reply);
        assert_eq!(neg.flags().ttype, "dumb");
        // TTYPE no longer counts against the handshake.
        neg.handle_negotiation(WILL, NAWS);
        neg.handle_negotiation(DONT, MCCP2);
        neg.handle_negotiation(DONT, MSSP);
        neg.handle_negotiation(DONT, MXP);
        neg.handle_negotiation(DONT, MSDP);
        neg.handle_negotiation(DONT, GMCP);
        assert!(neg.is_complete());
    }
}
