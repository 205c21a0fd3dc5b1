/// End-of-content decision. A virtualised list that stopped rendering looks
/// exactly like one that reached its end, so the only signal is how many
/// consecutive cycles produced nothing new.
pub fn should_stop(idle_scroll_count: u32, max_idle_scrolls: u32) -> bool {
    idle_scroll_count >= max_idle_scrolls
}
