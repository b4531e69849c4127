/// One polar bucket's statistical background model.
///
/// Owned by its `BackgroundGrid`; mutated only inside `process_frame*` while
/// the grid's lock is held.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackgroundCell {
    pub average_range_m: f32,
    pub range_spread_m: f32,
    pub times_seen_count: u32,
    pub last_update_ns: i64,
    pub frozen_until_ns: i64,
    pub recent_foreground_count: u16,
    pub locked_baseline: f32,
    pub locked_spread: f32,
    pub locked_at_count: u32,
}

impl BackgroundCell {
    pub fn is_frozen(&self, now_ns: i64) -> bool {
        self.frozen_until_ns > now_ns
    }
}
