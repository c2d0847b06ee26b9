//! Progress entries are keyed by `"{slug}__episode-{number}"`, the same id
//! format the extension persisted, so documents written by either side stay
//! interchangeable.

/// Build the unique id for one episode of one series.
pub fn episode_key(slug: &str, number: u32) -> String {
    format!("{slug}__episode-{number}")
}

/// Split an id back into its slug and episode number.
///
/// Returns `None` for ids that don't follow the format; callers treat those
/// entries as unmatchable garbage rather than failing.
pub fn parse_episode_key(id: &str) -> Option<(&str, u32)> {
    let (slug, number) = id.rsplit_once("__episode-")?;
    if slug.is_empty() || number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    number.parse().ok().map(|number| (slug, number))
}
