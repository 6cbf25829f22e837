//! Command-set factories and the line dispatcher.
//!
//! Every inbound line is matched against the session's folded command
//! set. What a session may do is therefore entirely a matter of what is
//! on its stack: before login only the bootstrap set is there, and a
//! successful login pushes the account set, whose Replace merge retires
//! the bootstrap commands.
//!
//! Unknown commands answer in-band; nothing a client types can raise an
//! error past this module.

use crate::auth::AuthOutcome;
use crate::entity::PuppetOutcome;
use crate::state::LogicShared;
use meridian_cmdset::{CmdSetRegistry, Command, CommandSet, MergeType};
use meridian_session::{DisconnectReason, PuppetId, SessionPatch, Sessid, SyncEvent};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Factory key of the pre-login bootstrap set.
pub const SESSION_CMDSET: &str = "session_base";
/// Factory key of the post-login account set.
pub const ACCOUNT_CMDSET: &str = "account";

fn session_cmdset() -> CommandSet {
    let mut set = CommandSet::new(SESSION_CMDSET, 0);
    set.permanent = true;
    set.add(
        Command::new("connect")
            .with_aliases(&["login"])
            .with_help("connect <account> <password> - log into your account"),
    );
    set.add(Command::new("look").with_help("look - show where you stand"));
    set.add(Command::new("help").with_help("help - list available commands"));
    set.add(Command::new("quit").with_help("quit - close the connection"));
    set
}

fn account_cmdset() -> CommandSet {
    let mut set = CommandSet::new(ACCOUNT_CMDSET, 1).with_mergetype(MergeType::Replace);
    set.permanent = true;
    set.add(Command::new("look").with_help("look - show where you stand"));
    set.add(Command::new("say").with_aliases(&["'"]).with_help("say <text> - speak to everyone"));
    set.add(Command::new("who").with_help("who - list connected sessions"));
    set.add(Command::new("puppet").with_help("puppet <id> - take control of one of your bodies"));
    set.add(Command::new("unpuppet").with_help("unpuppet - release your current body"));
    set.add(Command::new("help").with_help("help - list available commands"));
    set.add(Command::new("quit").with_help("quit - close the connection"));
    set
}

/// Registers the built-in factories. Called once at process start.
pub fn register_factories(registry: &CmdSetRegistry) {
    registry.register(SESSION_CMDSET, session_cmdset);
    registry.register(ACCOUNT_CMDSET, account_cmdset);
}

/// Routes one inbound line through the session's current command set.
pub async fn dispatch(shared: &Arc<LogicShared>, sessid: Sessid, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (name, args) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    let current = shared.stack_for(sessid).current();
    let Some(command) = current.commands.values().find(|c| c.matches(name)) else {
        debug!(sessid, command = name, "unknown command");
        shared
            .send_text(
                sessid,
                &format!("Unknown command: '{name}'. Type 'help' for a list.\n"),
            )
            .await;
        return;
    };

    match command.key.as_str() {
        "connect" => cmd_connect(shared, sessid, args).await,
        "look" => cmd_look(shared, sessid).await,
        "say" => cmd_say(shared, sessid, args).await,
        "who" => cmd_who(shared, sessid).await,
        "puppet" => cmd_puppet(shared, sessid, args).await,
        "unpuppet" => cmd_unpuppet(shared, sessid).await,
        "help" => cmd_help(shared, sessid, &current.keys(), &current).await,
        "quit" => cmd_quit(shared, sessid).await,
        other => {
            // A stacked set introduced a command without a handler.
            debug!(sessid, command = other, "command has no handler");
            shared
                .send_text(sessid, &format!("'{other}' is not available right now.\n"))
                .await;
        }
    }
}

async fn cmd_connect(shared: &Arc<LogicShared>, sessid: Sessid, args: &str) {
    let Some((name, password)) = args.split_once(char::is_whitespace) else {
        shared
            .send_text(sessid, "Usage: connect <account> <password>\n")
            .await;
        return;
    };
    let (name, password) = (name.trim(), password.trim());

    match shared.authenticator.authenticate(name, password).await {
        AuthOutcome::Success(account) => {
            let patch = match shared.sessions.set_login(sessid, account) {
                Ok(patch) => patch,
                Err(e) => {
                    debug!(sessid, error = %e, "login for unknown session");
                    return;
                }
            };
            shared.set_account_name(account, name);
            shared.mirror_patch(sessid, patch);

            // Informational ack alongside the mirror update.
            let ack = meridian_wire::AdminMessage::with_data(
                meridian_wire::AdminOp::Login,
                json!({"sessid": sessid, "account": account.0}),
            );
            if let Ok(msg) = meridian_wire::WireMessage::admin_to_gateway(sessid, &ack) {
                let _ = shared.links.broadcast(&msg);
            }

            shared
                .stack_for(sessid)
                .push(shared.cmdsets.resolve(ACCOUNT_CMDSET))
                .await;

            // Restore the display flags remembered from the last visit.
            if let Some(flags) = shared.flag_store.recall(account) {
                let patch = SessionPatch {
                    server_data: Some(json!({ "remembered_flags": flags })),
                    ..Default::default()
                };
                let event = SyncEvent::PartialUpdate {
                    sessid,
                    origin: meridian_session::PatchOrigin::Logic,
                    patch,
                };
                match shared.sessions.apply(event.clone()) {
                    Ok(_) => {
                        if let Err(e) = shared.send_sync(&event) {
                            debug!(sessid, error = %e, "remembered flags not mirrored");
                        }
                    }
                    Err(e) => debug!(sessid, error = %e, "remembered flags not restored"),
                }
            }

            let body = shared.entities.ensure_for_account(account, name);
            info!(sessid, account = account.0, "session authenticated");
            shared
                .send_text(
                    sessid,
                    &format!(
                        "Welcome, {name}! Your body '{}' is #{}. Type 'puppet {}' to take control.\n",
                        body.name, body.id.0, body.id.0
                    ),
                )
                .await;
        }
        AuthOutcome::BadCredentials => {
            shared
                .send_text(sessid, "Wrong account name or password.\n")
                .await;
        }
        AuthOutcome::Throttled { retry_after } => {
            shared
                .send_text(
                    sessid,
                    &format!(
                        "Too many failed attempts. Try again in {} seconds.\n",
                        retry_after.as_secs().max(1)
                    ),
                )
                .await;
        }
    }
}

async fn cmd_look(shared: &Arc<LogicShared>, sessid: Sessid) {
    let Some(record) = shared.sessions.get(sessid) else {
        return;
    };
    let text = match (record.account_uid, record.puppet_id) {
        (Some(account), Some(puppet)) => {
            let body = shared
                .entities
                .get(puppet)
                .map(|e| e.name)
                .unwrap_or_else(|| "something nameless".into());
            format!(
                "You are {} wearing the body '{body}' (#{}).\n",
                shared.account_name(account),
                puppet.0
            )
        }
        (Some(account), None) => format!(
            "You are {}, bodiless. Your bodies: {}.\n",
            shared.account_name(account),
            shared
                .entities
                .owned_by(account)
                .iter()
                .map(|e| format!("'{}' #{}", e.name, e.id.0))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        _ => "A featureless void. Type 'connect <account> <password>' to log in.\n".into(),
    };
    shared.send_text(sessid, &text).await;
}

async fn cmd_say(shared: &Arc<LogicShared>, sessid: Sessid, args: &str) {
    if args.is_empty() {
        shared.send_text(sessid, "Say what?\n").await;
        return;
    }
    let Some(record) = shared.sessions.get(sessid) else {
        return;
    };
    let speaker = match (record.puppet_id, record.account_uid) {
        (Some(puppet), _) => shared
            .entities
            .get(puppet)
            .map(|e| e.name)
            .unwrap_or_else(|| "Someone".into()),
        (None, Some(account)) => shared.account_name(account),
        _ => "Someone".into(),
    };
    let text = format!("{speaker} says, \"{args}\"\n");
    for other in shared.sessions.snapshot() {
        shared.send_text(other.sessid, &text).await;
    }
}

async fn cmd_who(shared: &Arc<LogicShared>, sessid: Sessid) {
    let mut records = shared.sessions.snapshot();
    records.sort_by_key(|r| r.sessid);
    let mut text = format!("{} session(s) connected:\n", records.len());
    for record in records {
        let account = record
            .account_uid
            .map(|a| shared.account_name(a))
            .unwrap_or_else(|| "(not logged in)".into());
        text.push_str(&format!(
            "  #{:<6} {:<20} {:<12} idle {}s\n",
            record.sessid,
            account,
            record.protocol_key,
            record.idle_seconds()
        ));
    }
    shared.send_text(sessid, &text).await;
}

async fn cmd_puppet(shared: &Arc<LogicShared>, sessid: Sessid, args: &str) {
    let Ok(id) = args.trim().parse::<u64>() else {
        shared.send_text(sessid, "Usage: puppet <id>\n").await;
        return;
    };
    match shared
        .entities
        .try_puppet(&shared.sessions, sessid, PuppetId(id))
    {
        PuppetOutcome::Ok(puppet) => {
            shared.mirror_patch(
                sessid,
                SessionPatch {
                    puppet_id: Some(Some(puppet)),
                    ..Default::default()
                },
            );
            let name = shared
                .entities
                .get(puppet)
                .map(|e| e.name)
                .unwrap_or_default();
            shared
                .send_text(sessid, &format!("You become '{name}' (#{}).\n", puppet.0))
                .await;
        }
        PuppetOutcome::AlreadyPuppeting(current) => {
            shared
                .send_text(
                    sessid,
                    &format!("You already control #{}. 'unpuppet' first.\n", current.0),
                )
                .await;
        }
        PuppetOutcome::NoPermission => {
            shared
                .send_text(sessid, "You cannot puppet that.\n")
                .await;
        }
        PuppetOutcome::AlreadyPuppeted(holder) => {
            shared
                .send_text(
                    sessid,
                    &format!("That body is already controlled (session #{holder}).\n"),
                )
                .await;
        }
    }
}

async fn cmd_unpuppet(shared: &Arc<LogicShared>, sessid: Sessid) {
    let puppeting = shared
        .sessions
        .get(sessid)
        .map(|r| r.puppet_id.is_some())
        .unwrap_or(false);
    if !puppeting {
        shared
            .send_text(sessid, "You are not puppeting anything.\n")
            .await;
        return;
    }
    if let Ok(patch) = shared.sessions.set_puppet(sessid, None) {
        shared.mirror_patch(sessid, patch);
        shared.send_text(sessid, "You release your body.\n").await;
    }
}

async fn cmd_help(
    shared: &Arc<LogicShared>,
    sessid: Sessid,
    keys: &[String],
    current: &meridian_cmdset::CommandSet,
) {
    let mut text = String::from("Available commands:\n");
    for key in keys {
        if let Some(command) = current.get(key) {
            if command.help.is_empty() {
                text.push_str(&format!("  {key}\n"));
            } else {
                text.push_str(&format!("  {}\n", command.help));
            }
        }
    }
    shared.send_text(sessid, &text).await;
}

async fn cmd_quit(shared: &Arc<LogicShared>, sessid: Sessid) {
    shared.send_text(sessid, "Goodbye.\n").await;
    let event = SyncEvent::Disconnect {
        sessid,
        reason: DisconnectReason::ClientDisconnect,
    };
    if let Err(e) = shared.send_sync(&event) {
        debug!(sessid, error = %e, "quit notice not delivered");
    }
    // Local removal mirrors what the gateway will do on its side.
    if let Ok(removed) = shared.sessions.apply(event) {
        for record in removed {
            shared.cleanup_session(&record);
        }
    }
}
