use serde::Serialize;

/// Summary of one fan-out run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BroadcastReport {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub failed_ids: Vec<i64>,
}
