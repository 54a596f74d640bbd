use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

pub fn subscribe_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "✅ I subscribed",
        "check_sub",
    )]])
}

pub fn menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("👥 My referrals", "ref_info")],
        vec![InlineKeyboardButton::callback("💰 Balance", "balance")],
    ])
}

pub fn admin_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("📊 Stats", "admin_stats")],
        vec![InlineKeyboardButton::callback(
            "📣 Broadcast",
            "admin_broadcast",
        )],
        vec![InlineKeyboardButton::callback("🧾 Audit log", "admin_log")],
    ])
}

pub fn cancel_broadcast_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "✖ Cancel",
        "admin_cancel",
    )]])
}
