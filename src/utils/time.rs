/// Formats whole minutes the way every surface displays durations: "3h 25m",
/// or just "25m" under an hour.
pub fn format_minutes(minutes: u64) -> String {
    let hours = minutes / 60;
    let minutes = minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// hh:mm style used by the live timer display.
pub fn format_timer(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
