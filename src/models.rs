pub mod admin_log;
pub mod broadcast;
pub mod referrals;
pub mod users;
