/// Boundary errors. Per the spec's error taxonomy, only `set_*` / restore /
/// persistence call sites surface errors; the hot (per-point, per-frame)
/// path never returns one, it drops and counts instead.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("ring elevation table length {got} does not match grid rings {expected}")]
    RingElevationLengthMismatch { expected: usize, got: usize },

    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: f64,
    },
}
