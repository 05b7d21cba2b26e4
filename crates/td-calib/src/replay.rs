//! Rebuilding accumulators from persisted residual rows.

use td_core::Result;
use td_hist::{HistogramKind, HistogramSet, HistogramSetConfig};

use crate::records::Record;
use crate::residual::fill_track;

/// Fill the accumulators named in `selection` from the `delta` rows in `records`.
///
/// `selection = None` fills every accumulator enabled in `config`. At most
/// `max_tracks` residual rows are consumed; other record kinds are ignored.
pub fn fill_histograms_from_records<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    config: &HistogramSetConfig,
    selection: Option<&[HistogramKind]>,
    max_tracks: Option<usize>,
) -> Result<HistogramSet> {
    let config = match selection {
        Some(kinds) => HistogramSetConfig { enabled: kinds.to_vec(), ..config.clone() },
        None => config.clone(),
    };
    let mut set = HistogramSet::new(&config)?;
    let limit = max_tracks.unwrap_or(usize::MAX);
    let mut tracks = 0usize;
    let mut samples = 0usize;
    for record in records.into_iter().filter_map(Record::as_track).take(limit) {
        samples += fill_track(&mut set, record);
        tracks += 1;
    }
    log::info!("replayed {tracks} tracks into {samples} accumulator entries");
    Ok(set)
}
