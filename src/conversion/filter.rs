//! Time-stretch filter chain construction
//!
//! ffmpeg's `atempo` filter only accepts factors up to 2.0, so larger speed-ups
//! are expressed as a chain of stages whose product is the requested speed.

/// Largest factor a single `atempo` stage accepts
pub const MAX_STAGE_FACTOR: f64 = 2.0;

/// Split `speed` into stages of at most 2.0 whose product is `speed`
///
/// Factors below the codec's minimum are passed through unchanged.
pub fn build_chain(speed: f64) -> Vec<f64> {
    let mut stages = Vec::new();
    let mut remaining = speed;
    while remaining > MAX_STAGE_FACTOR {
        stages.push(MAX_STAGE_FACTOR);
        remaining /= MAX_STAGE_FACTOR;
    }
    stages.push(remaining);
    stages
}

/// Render stages as an ffmpeg audio filter (`atempo=2,atempo=1.125`)
pub fn filter_spec(stages: &[f64]) -> String {
    stages
        .iter()
        .map(|factor| format!("atempo={}", factor))
        .collect::<Vec<_>>()
        .join(",")
}
