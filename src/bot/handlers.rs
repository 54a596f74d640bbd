use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MaybeInaccessibleMessage, UserId};

use super::{keyboards, BotContext, Command};
use crate::models::users::NewUser;
use crate::services::ledger::LedgerRequest;
use crate::services::ServiceError;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again later.";

pub async fn handle_command(bot: Bot, ctx: BotContext, msg: Message, cmd: Command) -> Result<()> {
    match cmd {
        Command::Start(payload) => start(&bot, &ctx, &msg, payload.trim()).await,
        Command::Admin => admin_panel(&bot, &ctx, &msg).await,
        Command::Credit { target, delta } => adjust_balance(&bot, &ctx, &msg, target, delta).await,
        Command::Clear { target } => clear_balance(&bot, &ctx, &msg, target).await,
    }
}

/// Registers the caller (with the optional referral deep-link payload),
/// verifies channel membership and shows either the subscription prompt or
/// the main menu.
async fn start(bot: &Bot, ctx: &BotContext, msg: &Message, payload: &str) -> Result<()> {
    let Some(from) = msg.from.clone() else {
        return Ok(());
    };
    let user_id = from.id.0 as i64;

    let new_user = NewUser {
        user_id,
        username: from.username.clone(),
        first_name: Some(from.first_name.clone()),
        last_name: from.last_name.clone(),
        referrer_id: parse_referrer(payload),
    };

    match ctx
        .ledger_call(|response| LedgerRequest::Register { new_user, response })
        .await
    {
        Ok(outcome) if outcome.created => log::info!("Registered new user {user_id}"),
        Ok(_) => {}
        Err(e) => {
            log::error!("Registration of {user_id} failed: {e}");
            bot.send_message(msg.chat.id, GENERIC_FAILURE).await?;
            return Ok(());
        }
    }

    let subscribed = is_channel_member(bot, ctx.settings.bot.channel_id, from.id).await;
    if let Err(e) = ctx
        .ledger_call(|response| LedgerRequest::SetSubscribed {
            user_id,
            verified: subscribed,
            response,
        })
        .await
    {
        log::error!("Could not store subscription flag for {user_id}: {e}");
    }

    if subscribed {
        bot.send_message(msg.chat.id, "Welcome back! Pick an option below.")
            .reply_markup(keyboards::menu_keyboard())
            .await?;
    } else {
        bot.send_message(msg.chat.id, subscribe_prompt(&ctx.settings.bot.channel_link))
            .reply_markup(keyboards::subscribe_keyboard())
            .await?;
    }

    Ok(())
}

async fn admin_panel(bot: &Bot, ctx: &BotContext, msg: &Message) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let admin_id = from.id.0 as i64;
    if let Err(e) = ctx.require_admin(admin_id) {
        log::warn!("{e}");
        bot.send_message(msg.chat.id, "This command is not available.")
            .await?;
        return Ok(());
    }

    match ctx.ledger_call(|response| LedgerRequest::Stats { response }).await {
        Ok(stats) => {
            bot.send_message(msg.chat.id, stats_text(&stats))
                .reply_markup(keyboards::admin_keyboard())
                .await?;
        }
        Err(e) => {
            log::error!("Could not load stats: {e}");
            bot.send_message(msg.chat.id, GENERIC_FAILURE).await?;
        }
    }

    Ok(())
}

async fn adjust_balance(
    bot: &Bot,
    ctx: &BotContext,
    msg: &Message,
    target: i64,
    delta: i64,
) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let admin_id = from.id.0 as i64;
    if let Err(e) = ctx.require_admin(admin_id) {
        log::warn!("{e}");
        bot.send_message(msg.chat.id, "This command is not available.")
            .await?;
        return Ok(());
    }

    let adjusted = ctx
        .ledger_call(|response| LedgerRequest::AdjustBalance {
            admin_id,
            user_id: target,
            delta,
            response,
        })
        .await;
    match adjusted {
        Ok(()) => {
            bot.send_message(
                msg.chat.id,
                format!("Applied {delta:+} to the balance of user {target}."),
            )
            .await?;
        }
        Err(e) if is_not_found(&e) => {
            bot.send_message(msg.chat.id, format!("User {target} is not registered."))
                .await?;
        }
        Err(e) => {
            log::error!("Balance adjustment for {target} failed: {e}");
            bot.send_message(msg.chat.id, GENERIC_FAILURE).await?;
        }
    }

    Ok(())
}

async fn clear_balance(bot: &Bot, ctx: &BotContext, msg: &Message, target: i64) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let admin_id = from.id.0 as i64;
    if let Err(e) = ctx.require_admin(admin_id) {
        log::warn!("{e}");
        bot.send_message(msg.chat.id, "This command is not available.")
            .await?;
        return Ok(());
    }

    let cleared = ctx
        .ledger_call(|response| LedgerRequest::ClearBalance {
            admin_id,
            user_id: target,
            response,
        })
        .await;
    match cleared {
        Ok(old_balance) => {
            bot.send_message(
                msg.chat.id,
                format!("Balance of user {target} cleared ({old_balance} removed)."),
            )
            .await?;
        }
        Err(e) if is_not_found(&e) => {
            bot.send_message(msg.chat.id, format!("User {target} is not registered."))
                .await?;
        }
        Err(e) => {
            log::error!("Balance clear for {target} failed: {e}");
            bot.send_message(msg.chat.id, GENERIC_FAILURE).await?;
        }
    }

    Ok(())
}

/// Plain (non-command) messages only matter when an admin has an open
/// broadcast session: the text becomes the broadcast payload.
pub async fn handle_message(bot: Bot, ctx: BotContext, msg: Message) -> Result<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let admin_id = from.id.0 as i64;
    if !ctx.is_admin(admin_id) {
        return Ok(());
    }
    let Some(text) = msg.text().map(str::to_owned) else {
        return Ok(());
    };
    if !ctx.sessions.take_broadcast(admin_id) {
        return Ok(());
    }

    let recipients = match ctx
        .ledger_call(|response| LedgerRequest::ListUserIds { response })
        .await
    {
        Ok(ids) => ids,
        Err(e) => {
            log::error!("Could not list broadcast recipients: {e}");
            bot.send_message(msg.chat.id, GENERIC_FAILURE).await?;
            return Ok(());
        }
    };

    bot.send_message(
        msg.chat.id,
        format!("Broadcasting to {} users…", recipients.len()),
    )
    .await?;

    match ctx.broadcast_call(recipients, text, admin_id).await {
        Ok(report) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "Broadcast finished: attempted {}, delivered {}, failed {}.",
                    report.attempted, report.succeeded, report.failed
                ),
            )
            .await?;
        }
        Err(e) => {
            log::error!("Broadcast failed: {e}");
            bot.send_message(msg.chat.id, GENERIC_FAILURE).await?;
        }
    }

    Ok(())
}

pub async fn handle_callback(bot: Bot, ctx: BotContext, q: CallbackQuery) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let user_id = q.from.id.0 as i64;
    let chat_id = ChatId(user_id);

    match data {
        "check_sub" => {
            let subscribed =
                is_channel_member(&bot, ctx.settings.bot.channel_id, q.from.id).await;
            if let Err(e) = ctx
                .ledger_call(|response| LedgerRequest::SetSubscribed {
                    user_id,
                    verified: subscribed,
                    response,
                })
                .await
            {
                log::error!("Could not store subscription flag for {user_id}: {e}");
            }

            if subscribed {
                send_or_edit(
                    &bot,
                    chat_id,
                    q.message.as_ref(),
                    "Subscription confirmed! Pick an option below.".to_string(),
                    Some(keyboards::menu_keyboard()),
                )
                .await?;
            } else {
                send_or_edit(
                    &bot,
                    chat_id,
                    q.message.as_ref(),
                    subscribe_prompt(&ctx.settings.bot.channel_link),
                    Some(keyboards::subscribe_keyboard()),
                )
                .await?;
            }
        }
        "ref_info" => {
            match ctx
                .ledger_call(|response| LedgerRequest::ReferralInfo { user_id, response })
                .await
            {
                Ok(info) => {
                    let me = bot.get_me().await?;
                    let text = format!(
                        "You invited {} users. {} more to reach the reward.\n\nYour invite link:\nhttps://t.me/{}?start=ref{}",
                        info.invited_count,
                        info.needed_count,
                        me.username(),
                        user_id
                    );
                    send_or_edit(
                        &bot,
                        chat_id,
                        q.message.as_ref(),
                        text,
                        Some(keyboards::menu_keyboard()),
                    )
                    .await?;
                }
                Err(e) => {
                    log::error!("Could not load referral info for {user_id}: {e}");
                    bot.send_message(chat_id, GENERIC_FAILURE).await?;
                }
            }
        }
        "balance" => {
            match ctx
                .ledger_call(|response| LedgerRequest::GetUser { user_id, response })
                .await
            {
                Ok(user) => {
                    let balance = user.map(|u| u.balance).unwrap_or(0);
                    send_or_edit(
                        &bot,
                        chat_id,
                        q.message.as_ref(),
                        format!("Your balance: {balance}"),
                        Some(keyboards::menu_keyboard()),
                    )
                    .await?;
                }
                Err(e) => {
                    log::error!("Could not load balance for {user_id}: {e}");
                    bot.send_message(chat_id, GENERIC_FAILURE).await?;
                }
            }
        }
        "admin_stats" if ctx.is_admin(user_id) => {
            match ctx.ledger_call(|response| LedgerRequest::Stats { response }).await {
                Ok(stats) => {
                    send_or_edit(
                        &bot,
                        chat_id,
                        q.message.as_ref(),
                        stats_text(&stats),
                        Some(keyboards::admin_keyboard()),
                    )
                    .await?;
                }
                Err(e) => {
                    log::error!("Could not load stats: {e}");
                    bot.send_message(chat_id, GENERIC_FAILURE).await?;
                }
            }
        }
        "admin_broadcast" if ctx.is_admin(user_id) => {
            ctx.sessions.open_broadcast(user_id);
            send_or_edit(
                &bot,
                chat_id,
                q.message.as_ref(),
                "Send me the broadcast text as a regular message.".to_string(),
                Some(keyboards::cancel_broadcast_keyboard()),
            )
            .await?;
        }
        "admin_log" if ctx.is_admin(user_id) => {
            match ctx
                .ledger_call(|response| LedgerRequest::RecentAdminActions {
                    limit: 10,
                    response,
                })
                .await
            {
                Ok(entries) => {
                    send_or_edit(
                        &bot,
                        chat_id,
                        q.message.as_ref(),
                        audit_text(&entries),
                        Some(keyboards::admin_keyboard()),
                    )
                    .await?;
                }
                Err(e) => {
                    log::error!("Could not load admin log: {e}");
                    bot.send_message(chat_id, GENERIC_FAILURE).await?;
                }
            }
        }
        "admin_cancel" if ctx.is_admin(user_id) => {
            let text = if ctx.sessions.cancel(user_id) {
                "Broadcast cancelled."
            } else {
                "No broadcast in progress."
            };
            send_or_edit(
                &bot,
                chat_id,
                q.message.as_ref(),
                text.to_string(),
                Some(keyboards::admin_keyboard()),
            )
            .await?;
        }
        _ => {}
    }

    Ok(())
}

async fn is_channel_member(bot: &Bot, channel_id: i64, user_id: UserId) -> bool {
    match bot.get_chat_member(ChatId(channel_id), user_id).await {
        Ok(member) => member.kind.is_present(),
        Err(e) => {
            log::warn!("Membership check for {user_id} failed: {e}");
            false
        }
    }
}

async fn send_or_edit(
    bot: &Bot,
    chat_id: ChatId,
    message: Option<&MaybeInaccessibleMessage>,
    text: String,
    markup: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    if let Some(msg) = message.and_then(|m| m.regular_message()) {
        let mut req = bot.edit_message_text(chat_id, msg.id, text);
        if let Some(kb) = markup {
            req = req.reply_markup(kb);
        }
        req.await?;
    } else {
        let mut req = bot.send_message(chat_id, text);
        if let Some(kb) = markup {
            req = req.reply_markup(kb);
        }
        req.await?;
    }

    Ok(())
}

fn subscribe_prompt(channel_link: &str) -> String {
    format!(
        "To use the bot, subscribe to our channel first:\n{channel_link}\n\nThen press the button below."
    )
}

fn is_not_found(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<ServiceError>(),
        Some(ServiceError::NotFound(_))
    )
}

fn audit_text(entries: &[crate::models::admin_log::AdminLogEntry]) -> String {
    if entries.is_empty() {
        return "No admin actions recorded yet.".to_string();
    }

    let mut out = String::from("Recent admin actions:\n");
    for entry in entries {
        out.push_str(&format!(
            "\n• {} by {}{}{}",
            entry.action,
            entry.admin_id,
            entry
                .target_id
                .map(|t| format!(" on {t}"))
                .unwrap_or_default(),
            entry
                .amount
                .map(|a| format!(" ({a})"))
                .unwrap_or_default(),
        ));
    }
    out
}

fn stats_text(stats: &crate::models::users::LedgerStats) -> String {
    format!(
        "👤 Users: {}\n✅ Subscribed: {}\n👥 Referrals: {}\n💰 Balance total: {}",
        stats.users, stats.subscribed, stats.referral_total, stats.balance_total
    )
}

/// Accepts both `ref123456` deep-link payloads and bare numeric ids.
fn parse_referrer(payload: &str) -> Option<i64> {
    let digits = payload.strip_prefix("ref").unwrap_or(payload);
    digits.parse::<i64>().ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::parse_referrer;

    #[test]
    fn parses_deep_link_payloads() {
        assert_eq!(parse_referrer("ref123456"), Some(123456));
        assert_eq!(parse_referrer("123456"), Some(123456));
        assert_eq!(parse_referrer(""), None);
        assert_eq!(parse_referrer("ref"), None);
        assert_eq!(parse_referrer("refabc"), None);
        assert_eq!(parse_referrer("-5"), None);
    }
}
