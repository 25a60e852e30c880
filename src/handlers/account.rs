// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! `AccountRegister` / `AccountLogin` handlers (§8 S2–S4): decode the
//! request on the section worker task, then hand the actual query off to a
//! [`crate::db::async_context::AsyncDbContext`] running on a hard-task
//! thread. Both reply with a structured result code on failure rather than
//! disconnecting the session (§229).

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::warn;

use crate::codec::message::Message;
use crate::codec::packet::Packet;
use crate::db::async_context::AsyncDbContext;
use crate::db::value::Value;
use crate::errors::DbError;
use crate::handlers::AppState;
use crate::messages::{AccountLoginMessage, AccountLoginResult, AccountRegisterMessage, AccountRegisterResult};
use crate::net::session::Session;

/// Encodes `msg` and spawns its delivery onto `handle`. Used from contexts
/// (hard-task threads) that have no tokio runtime of their own.
fn reply<M: Message + 'static>(handle: &Handle, session: Arc<Session>, msg: M) {
    match msg.encode() {
        Ok(body) => {
            let packet = Arc::new(Packet::new(M::protocol_no(), body));
            handle.spawn(async move { session.send_packet(packet).await });
        },
        Err(e) => warn!("session {}: failed to encode reply: {e}", session.id()),
    }
}

pub fn register(session: &Arc<Session>, app: AppState) {
    register_account_register(session, app.clone());
    register_account_login(session, app);
}

fn register_account_register(session: &Arc<Session>, app: AppState) {
    session.register_handler(AccountRegisterMessage::protocol_no(), move |session, packet| {
        let request = match AccountRegisterMessage::decode(packet.body()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("session {}: malformed AccountRegister body: {e}", session.id());
                return;
            },
        };

        let handle = Handle::current();
        let reply_handle = handle.clone();
        let error_handle = handle;
        let id = request.id;
        let password = request.password;

        let ctx: AsyncDbContext<AccountRegisterResult> = AsyncDbContext::new(
            &session,
            move |session, result| reply(&reply_handle, session, AccountRegisterMessage::reply(result)),
            move |session, e| {
                warn!("session {}: account register failed: {e}", session.id());
                reply(
                    &error_handle,
                    session,
                    AccountRegisterMessage::reply(AccountRegisterResult::ServerError),
                );
            },
        );

        ctx.submit(&app.hard_tasks, app.pool.clone(), app.acquire_timeout, move |conn| {
            let mut stmt = conn.prepare("INSERT INTO accounts (username, password_hash) VALUES (?, ?)")?;
            stmt.bind(0, Value::Text(id.clone()))?;
            stmt.bind(1, Value::Text(password.clone()))?;
            match stmt.execute_insert() {
                Ok(_) => Ok(AccountRegisterResult::Success),
                Err(DbError::Query(msg)) if msg.contains("duplicate") => Ok(AccountRegisterResult::IdAlreadyExists),
                Err(e) => Err(e),
            }
        });
    });
}

fn register_account_login(session: &Arc<Session>, app: AppState) {
    session.register_handler(AccountLoginMessage::protocol_no(), move |session, packet| {
        let request = match AccountLoginMessage::decode(packet.body()) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("session {}: malformed AccountLogin body: {e}", session.id());
                return;
            },
        };

        let handle = Handle::current();
        let reply_handle = handle.clone();
        let error_handle = handle;
        let id = request.id;
        let password = request.password;

        let ctx: AsyncDbContext<AccountLoginResult> = AsyncDbContext::new(
            &session,
            move |session, result| reply(&reply_handle, session, AccountLoginMessage::reply(result)),
            move |session, e| {
                warn!("session {}: account login failed: {e}", session.id());
                reply(
                    &error_handle,
                    session,
                    AccountLoginMessage::reply(AccountLoginResult::ServerError),
                );
            },
        );

        ctx.submit(&app.hard_tasks, app.pool.clone(), app.acquire_timeout, move |conn| {
            let mut stmt = conn.prepare("SELECT id, username, password_hash FROM accounts WHERE username = ?")?;
            stmt.bind(0, Value::Text(id.clone()))?;
            let result = stmt.execute_query()?;
            match result.fetch_all().first() {
                Some(row) if row.get_string_required("password_hash")? == password => Ok(AccountLoginResult::Success),
                _ => Ok(AccountLoginResult::IdOrPasswordWrong),
            }
        });
    });
}
