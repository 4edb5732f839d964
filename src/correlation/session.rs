use crate::log::Markers;

/// Index of the first line after the last configuration-completion marker.
///
/// Configuration may be re-applied several times during a run; only the final one
/// opens the session that gets analysed. `None` means the log never finished configuring.
pub fn locate_session_start<S: AsRef<str>>(lines: &[S], markers: &Markers) -> Option<usize> {
    lines
        .iter()
        .rposition(|line| markers.is_session_marker(line.as_ref()))
        .map(|idx| idx + 1)
}
