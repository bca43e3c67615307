use tracing::Level;

/// Install a `fmt` subscriber at `level` for the whole process.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one is kept.
pub fn init_tracing(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Parse a level name (`error`, `warn`, `info`, `debug`, `trace`), falling
/// back to `info`.
pub fn parse_level(name: &str) -> Level {
    name.parse().unwrap_or(Level::INFO)
}
